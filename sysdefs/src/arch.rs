/// Normalizes a raw `uname -m` machine string the way `os_detector.py`'s
/// `_get_architecture` does: known aliases collapse onto a canonical token,
/// everything else passes through unchanged so an unrecognized architecture
/// (`mips`, `ppc64le`, ...) is still reported faithfully rather than
/// silently dropped.
pub fn normalize(raw: &str) -> String {
    match raw {
        "x86_64" | "amd64" => "x86_64".to_string(),
        "i386" | "i686" => "i386".to_string(),
        "aarch64" => "arm64".to_string(),
        other if other.starts_with("arm") => "arm".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_known_aliases() {
        assert_eq!(normalize("x86_64"), "x86_64");
        assert_eq!(normalize("amd64"), "x86_64");
        assert_eq!(normalize("i686"), "i386");
        assert_eq!(normalize("aarch64"), "arm64");
        assert_eq!(normalize("armv7l"), "arm");
    }

    #[test]
    fn test_normalize_passthrough() {
        assert_eq!(normalize("ppc64le"), "ppc64le");
        assert_eq!(normalize("mips"), "mips");
    }
}
