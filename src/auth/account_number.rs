use rand::Rng;
use sha2::{Digest, Sha256};

/// Issues a virtual account number: `VA`, eight random digits, then a
/// checksum of the prefix rendered as a decimal byte (0-255).
pub fn generate_account_number() -> String {
    let digits: u32 = rand::thread_rng().gen_range(10_000_000..100_000_000);
    let base = format!("VA{}", digits);
    format!("{}{}", base, checksum(&base))
}

fn checksum(base: &str) -> u8 {
    Sha256::digest(base.as_bytes())[0]
}
