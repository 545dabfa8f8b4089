pub mod files;
pub mod quota;
pub mod vectorize;
