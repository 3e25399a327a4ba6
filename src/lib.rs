// Library exports for the image resizer

pub mod cli;
pub mod ecosystem;
pub mod error;
pub mod imaging;
pub mod server;
pub mod settings;
