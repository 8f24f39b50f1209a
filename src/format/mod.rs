pub mod layout;
pub mod pixel;

pub use layout::{Layout, LayoutError, PlaneLayout};
pub use pixel::{UnsupportedFormat, WireFormat};
