//! Parsers for files found in a bot's repository: Dockerfiles to lint and
//! dotenv files supplying runtime variables.

pub mod dockerfile;
pub mod env_file;
