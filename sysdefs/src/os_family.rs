use fleetpatch_api::model::{OsFamily, PackageManagerKind};

/// `(distribution substring, family, default package manager)`, checked in
/// order. Transcribed from `os_detector.py`'s `OS_PATTERNS`.
const OS_PATTERNS: &[(&str, OsFamily, PackageManagerKind)] = &[
    ("ubuntu", OsFamily::Linux, PackageManagerKind::Apt),
    ("debian", OsFamily::Linux, PackageManagerKind::Apt),
    ("linuxmint", OsFamily::Linux, PackageManagerKind::Apt),
    ("mint", OsFamily::Linux, PackageManagerKind::Apt),
    ("centos", OsFamily::Linux, PackageManagerKind::Yum),
    ("rhel", OsFamily::Linux, PackageManagerKind::Yum),
    ("red hat", OsFamily::Linux, PackageManagerKind::Yum),
    ("fedora", OsFamily::Linux, PackageManagerKind::Dnf),
    ("opensuse", OsFamily::Linux, PackageManagerKind::Zypper),
    ("suse", OsFamily::Linux, PackageManagerKind::Zypper),
    ("arch", OsFamily::Linux, PackageManagerKind::Pacman),
    ("manjaro", OsFamily::Linux, PackageManagerKind::Pacman),
    ("alpine", OsFamily::Linux, PackageManagerKind::Apk),
    ("freebsd", OsFamily::FreeBsd, PackageManagerKind::Pkg),
    ("openbsd", OsFamily::OpenBsd, PackageManagerKind::PkgAdd),
    ("darwin", OsFamily::Darwin, PackageManagerKind::Brew),
    ("macos", OsFamily::Darwin, PackageManagerKind::Brew),
];

/// Absolute paths checked with `test -x` to confirm a package manager is
/// actually installed, not just expected from the distribution pattern.
/// Transcribed from `os_detector.py`'s `PACKAGE_MANAGERS`.
pub fn candidate_paths(kind: PackageManagerKind) -> &'static [&'static str] {
    match kind {
        PackageManagerKind::Apt => &["/usr/bin/apt", "/usr/bin/apt-get"],
        PackageManagerKind::Yum => &["/usr/bin/yum", "/bin/yum"],
        PackageManagerKind::Dnf => &["/usr/bin/dnf", "/bin/dnf"],
        PackageManagerKind::Zypper => &["/usr/bin/zypper"],
        PackageManagerKind::Pacman => &["/usr/bin/pacman"],
        PackageManagerKind::Apk => &["/sbin/apk"],
        PackageManagerKind::Pkg => &["/usr/sbin/pkg"],
        PackageManagerKind::PkgAdd => &["/usr/sbin/pkg_add"],
        PackageManagerKind::Brew => &["/usr/local/bin/brew", "/opt/homebrew/bin/brew"],
        PackageManagerKind::Unknown => &[],
    }
}

/// Normalizes a raw distribution string the way
/// `os_detector.py`'s `_normalize_distribution_name` does: case-fold, then
/// collapse known variants onto a canonical name. Anything unrecognized
/// passes through unchanged.
pub fn normalize_distribution(distribution: &str) -> String {
    let d = distribution.to_lowercase();
    let d = d.trim();

    if d.contains("red hat") || d.contains("redhat") {
        return "rhel".to_string();
    }
    if d.contains("centos") {
        return "centos".to_string();
    }
    if d.contains("ubuntu") {
        return "ubuntu".to_string();
    }
    if d.contains("linuxmint") || d.contains("linux mint") || d == "mint" {
        return "linuxmint".to_string();
    }
    if d.contains("debian") {
        return "debian".to_string();
    }
    if d.contains("fedora") {
        return "fedora".to_string();
    }
    if d.contains("opensuse") || d.contains("suse") {
        return "opensuse".to_string();
    }
    if d.contains("arch") {
        return "arch".to_string();
    }
    if d.contains("manjaro") {
        return "manjaro".to_string();
    }
    if d.contains("alpine") {
        return "alpine".to_string();
    }
    if d.contains("freebsd") {
        return "freebsd".to_string();
    }
    if d.contains("openbsd") {
        return "openbsd".to_string();
    }
    if d.contains("darwin") || d.contains("macos") {
        return "macos".to_string();
    }

    d.to_string()
}

/// The OS family whose pattern is a substring of `distribution`, or
/// [`OsFamily::Unknown`] if none match.
pub fn family_for(distribution: &str) -> OsFamily {
    let lower = distribution.to_lowercase();
    OS_PATTERNS
        .iter()
        .find(|(pattern, _, _)| lower.contains(pattern))
        .map(|(_, family, _)| *family)
        .unwrap_or(OsFamily::Unknown)
}

/// The package manager a distribution pattern implies by default, before
/// confirming it is actually installed on the host.
pub fn default_package_manager(distribution: &str) -> Option<PackageManagerKind> {
    let lower = distribution.to_lowercase();
    OS_PATTERNS
        .iter()
        .find(|(pattern, _, _)| lower.contains(pattern))
        .map(|(_, _, pm)| *pm)
}

/// Every package manager kind, in the order `os_detector.py`'s
/// `PACKAGE_MANAGERS` fallback probe checks them.
pub fn all_package_managers() -> &'static [PackageManagerKind] {
    &[
        PackageManagerKind::Apt,
        PackageManagerKind::Yum,
        PackageManagerKind::Dnf,
        PackageManagerKind::Zypper,
        PackageManagerKind::Pacman,
        PackageManagerKind::Apk,
        PackageManagerKind::Pkg,
        PackageManagerKind::PkgAdd,
        PackageManagerKind::Brew,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_distribution() {
        assert_eq!(normalize_distribution("Red Hat Enterprise Linux"), "rhel");
        assert_eq!(normalize_distribution("Ubuntu"), "ubuntu");
        assert_eq!(normalize_distribution("openSUSE Leap"), "opensuse");
        assert_eq!(normalize_distribution("mint"), "linuxmint");
        assert_eq!(normalize_distribution("gentoo"), "gentoo");
    }

    #[test]
    fn test_family_for() {
        assert_eq!(family_for("ubuntu"), OsFamily::Linux);
        assert_eq!(family_for("freebsd"), OsFamily::FreeBsd);
        assert_eq!(family_for("macos"), OsFamily::Darwin);
        assert_eq!(family_for("plan9"), OsFamily::Unknown);
    }

    #[test]
    fn test_default_package_manager() {
        assert_eq!(
            default_package_manager("fedora"),
            Some(PackageManagerKind::Dnf)
        );
        assert_eq!(default_package_manager("plan9"), None);
    }
}
