pub mod html;
pub mod plots;

pub use html::render_html;
