pub mod batch;
pub mod face;
pub mod file_record;
pub mod job;
pub mod quota;

pub use batch::*;
pub use face::*;
pub use file_record::*;
pub use job::*;
pub use quota::*;
