pub mod keccak256;
pub mod secp256k1;
