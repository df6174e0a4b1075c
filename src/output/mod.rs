pub mod schema;

pub use schema::{
    BaseImage, DependencySpec, Healthcheck, ImageRecipe, RecipeMetadata, RuntimeSpec, SourceSpec,
};
