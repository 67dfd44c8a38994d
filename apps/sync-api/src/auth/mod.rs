pub mod middleware;
pub mod verifier;
