//! Domain models shared by the retrieval stages

pub mod citation;
pub mod conversation;
pub mod hit;
pub mod provenance;
pub mod tier;

pub use citation::*;
pub use conversation::*;
pub use hit::*;
pub use provenance::*;
pub use tier::*;
