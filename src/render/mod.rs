pub mod dockerfile;

pub use dockerfile::{render, render_dockerignore, render_instructions, RenderedInstruction};
