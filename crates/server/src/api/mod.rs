mod chat;
pub mod request_context;
mod router;

pub use router::create_router;
