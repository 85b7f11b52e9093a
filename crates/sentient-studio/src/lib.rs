//! Generative clients for Sentient
//!
//! Colour palettes from the Anthropic Messages API and city paintings from
//! the OpenAI Images API.

pub mod image;
pub mod palette;
pub mod prompt;

pub use image::{ArtifactSource, GenerationError, OpenAiImageGenerator};
pub use palette::{AnthropicPaletteGenerator, Palette, PaletteError, PaletteSource};
pub use prompt::{image_prompt, palette_prompt};

#[cfg(any(test, feature = "mocks"))]
pub use image::MockArtifactSource;
#[cfg(any(test, feature = "mocks"))]
pub use palette::MockPaletteSource;
