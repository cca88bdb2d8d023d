pub mod message;
pub mod prd;
pub mod research;
pub mod state;
