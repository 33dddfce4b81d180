pub mod date_range;
pub mod error;
#[cfg(feature = "api")]
pub mod http;
pub mod image;
pub mod observation;
pub mod site;
pub mod source;
pub mod survey;
