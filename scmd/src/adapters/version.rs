//! Tool version banners and minimum-version checks.

use std::cmp::Ordering;
use std::fmt;

/// Dotted version number; missing components compare as 0.
#[derive(Debug, Clone)]
pub struct ToolVersion(Vec<u32>);

impl ToolVersion {
    pub fn new(components: &[u32]) -> Self {
        Self(components.to_vec())
    }

    /// Parse `1.11.22`; components that are not plain numbers count as 0.
    pub fn parse_dotted(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(Self(
            text.split('.')
                .map(|part| part.parse::<u32>().unwrap_or(0))
                .collect(),
        ))
    }

    fn component(&self, index: usize) -> u32 {
        self.0.get(index).copied().unwrap_or(0)
    }

    pub fn at_least(&self, minimum: &ToolVersion) -> bool {
        self.cmp(minimum) != Ordering::Less
    }
}

impl Ord for ToolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialEq for ToolVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ToolVersion {}

impl PartialOrd for ToolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Version from `cvs -version`: the token after `(CVS)`.
pub fn parse_cvs_version(output: &str) -> Option<ToolVersion> {
    token_after(output, |token| token == "(CVS)")
}

/// Version from `svn --version`: the token after `version`, matched
/// without regard to case.
pub fn parse_svn_version(output: &str) -> Option<ToolVersion> {
    token_after(output, |token| token.eq_ignore_ascii_case("version"))
}

fn token_after(output: &str, marker: impl Fn(&str) -> bool) -> Option<ToolVersion> {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if marker(token) {
            return tokens.next().and_then(ToolVersion::parse_dotted);
        }
    }
    None
}

/// Version following `<library> version:` in `bdstool list-versions`.
pub fn parse_library_version(output: &str, library: &str) -> Option<String> {
    let marker = format!("{} version:", library);
    let start = output.find(&marker)? + marker.len();
    let rest = &output[start..];
    let line = rest.lines().next().unwrap_or("");
    Some(line.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cvs_banner() {
        let out = "\nConcurrent Versions System (CVS) 1.11.22 (client/server)\n\nCopyright (c) 1989-2006";
        assert_eq!(parse_cvs_version(out), Some(ToolVersion::new(&[1, 11, 22])));
    }

    #[test]
    fn test_cvs_patch_suffix_counts_as_zero() {
        let out = "Concurrent Versions System (CVS) 1.11p1 (client/server)";
        assert_eq!(parse_cvs_version(out), Some(ToolVersion::new(&[1, 0])));
        assert!(parse_cvs_version("no banner here").is_none());
    }

    #[test]
    fn test_svn_banner_any_case() {
        let out = "svn, version 1.14.2 (r1899510)\n   compiled Feb 10 2023";
        assert_eq!(parse_svn_version(out), Some(ToolVersion::new(&[1, 14, 2])));
        let german = "svn, Version 1.6.17 (r1128011)";
        assert_eq!(parse_svn_version(german), Some(ToolVersion::new(&[1, 6, 17])));
        assert!(parse_svn_version("svn: command not found").is_none());
    }

    #[test]
    fn test_minimums() {
        let cvs_min = ToolVersion::new(&[1, 11, 0]);
        assert!(ToolVersion::new(&[1, 11]).at_least(&cvs_min));
        assert!(ToolVersion::new(&[1, 12, 13]).at_least(&cvs_min));
        assert!(!ToolVersion::new(&[1, 10, 99]).at_least(&cvs_min));

        let svn_min = ToolVersion::new(&[1, 2, 1]);
        assert!(!ToolVersion::new(&[1, 2]).at_least(&svn_min));
        assert!(ToolVersion::new(&[2]).at_least(&svn_min));
    }

    #[test]
    fn test_library_version() {
        let out = "server version: 5.0\nclient.bdstool version: 2.3.1\nother: x";
        assert_eq!(
            parse_library_version(out, "client.bdstool").as_deref(),
            Some("2.3.1")
        );
        assert!(parse_library_version(out, "client.missing").is_none());
    }

    proptest! {
        #[test]
        fn prop_trailing_zeros_are_equal(a in 0u32..50, b in 0u32..50) {
            prop_assert_eq!(ToolVersion::new(&[a, b]), ToolVersion::new(&[a, b, 0]));
        }

        #[test]
        fn prop_order_matches_tuples(a in 0u32..5, b in 0u32..5, c in 0u32..5, d in 0u32..5) {
            prop_assert_eq!(
                ToolVersion::new(&[a, b]).cmp(&ToolVersion::new(&[c, d])),
                (a, b).cmp(&(c, d))
            );
        }
    }
}
