mod text;
mod url_validator;

pub use text::{
    decode_entities, fmt_timestamp, now_timestamp, strip_control_chars, truncate_chars,
};
pub use url_validator::{validate_url, UrlValidationError};
