use rand::Rng;
use rand::distributions::Alphanumeric;

/// Random alphanumeric secret of the requested length.
pub fn generate_secret(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
