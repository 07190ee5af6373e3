//! Presentation: the derived recorder view and the static footer

pub mod footer;
pub mod view;

pub use footer::Footer;
pub use view::{render_page, Panel, PrimaryAction, RecorderView};
