pub mod hash;
pub mod ja4s;
pub mod serverhello;
pub mod types;
