// Core modules implementing slot reservation, guarded storage, and error modeling.
pub mod error;
pub mod frontier;
pub mod record_file;
pub mod slots;
pub mod store;
