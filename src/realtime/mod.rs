pub mod broadcast;
pub mod presence;
pub mod socket;
