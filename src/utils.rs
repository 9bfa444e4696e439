use std::path::PathBuf;

pub fn expand_path(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(remainder) => dirs::home_dir().map(|home_dir| home_dir.join(remainder)),
        None => Some(PathBuf::from(path)),
    }
}

pub fn sat_to_msat(sat: u64) -> Option<u64> {
    sat.checked_mul(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_home() {
        if let Some(expanded) = expand_path("~/.lnd/tls.cert") {
            assert!(expanded.ends_with(".lnd/tls.cert"));
            assert!(!expanded.starts_with("~"));
        }

        assert_eq!(
            expand_path("/etc/lnd/tls.cert"),
            Some(PathBuf::from("/etc/lnd/tls.cert"))
        );
    }

    #[test]
    fn msat_conversion_overflows_to_none() {
        assert_eq!(sat_to_msat(21), Some(21_000));
        assert_eq!(sat_to_msat(u64::MAX / 1000 + 1), None);
    }
}
