pub mod fingerprint;
pub mod stability;
pub mod surface;
pub mod types;
pub mod zoning;
