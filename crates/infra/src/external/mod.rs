//! Ports to external services (mail delivery, AI recipe generation).
//!
//! The concrete vendors live outside this workspace; each port ships a
//! default implementation usable in development.

pub mod mailer;
pub mod recipe_ai;

pub use mailer::{EmailMessage, LogMailer, Mailer, MailerError};
pub use recipe_ai::{
    GeneratedRecipe, GeneratorError, RecipeGenerator, RecipeImage, UnconfiguredRecipeGenerator,
};
