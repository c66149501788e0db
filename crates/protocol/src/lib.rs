#![forbid(unsafe_code)]

mod message;

pub use message::{Request, Response};
