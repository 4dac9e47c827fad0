pub mod jwt;
pub mod mask;
pub mod normalize;
pub mod template;

pub use mask::mask_pii;
pub use normalize::normalize_text;
pub use template::render_template;
