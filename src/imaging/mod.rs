// Imaging module - JPEG renditions of source images and their disk cache

pub mod cache;
pub mod resize;

pub use cache::ImageCache;
pub use resize::{image_info, ImageInfo, Resizer};
