use rand::Rng;

/// Prefix of generated backend machine names
pub const MACHINE_NAME_PREFIX: &str = "docker-host-";

/// Random backend machine name, `docker-host-` followed by 12 hex digits
pub fn generate_machine_name() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..12)
        .map(|_| {
            let nibble: u32 = rng.random_range(0..16);
            char::from_digit(nibble, 16).unwrap_or('0')
        })
        .collect();
    format!("{MACHINE_NAME_PREFIX}{suffix}")
}
