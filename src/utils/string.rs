use rand::Rng;
use rand::distributions::Alphanumeric;

/// Convert bytes to a trimmed string, handling UTF-8 conversion errors gracefully
pub fn bytes_to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Random alphanumeric string, used for shared secrets and database passwords
pub fn random_secret(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Mask a secret for display, keeping the first two characters
pub fn mask_secret(secret: &str) -> String {
    if secret.chars().count() <= 4 {
        return "****".to_string();
    }
    let prefix: String = secret.chars().take(2).collect();
    format!("{}****", prefix)
}
