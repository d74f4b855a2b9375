//! `.gitignore`-style pattern matching for the bridge's file watcher.
//!
//! Supports `*`, `**`, `?`, character classes, leading `/` anchoring to the
//! project root, a trailing `/` meaning "this directory and everything
//! under it", and a leading `!` negation that re-includes a path excluded
//! by an earlier pattern. Patterns are evaluated left-to-right and the
//! last pattern that matches wins, exactly like `git check-ignore`.
//!
//! Matching a directory implies matching its contents: an ignored
//! directory's descendants never need to be tested individually, so a
//! caller walking the tree should treat [`IgnoreMatcher::is_ignored`]
//! returning `true` for a directory as a signal to stop descending into it
//! rather than separately re-testing every path underneath (the
//! traversal-skip interpretation, chosen for efficiency over re-testing
//! every descendant path one by one).

use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum IgnoreError {
    #[error("invalid ignore pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

struct CompiledPattern {
    negated: bool,
    regex: Regex,
}

pub struct IgnoreMatcher {
    patterns: Vec<CompiledPattern>,
}

impl IgnoreMatcher {
    /// Compiles an ordered list of `.gitignore`-style patterns.
    pub fn new(patterns: &[String]) -> Result<Self, IgnoreError> {
        let compiled = patterns
            .iter()
            .map(|raw| compile_pattern(raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(IgnoreMatcher { patterns: compiled })
    }

    /// Evaluates `path` (a forward-slash, project-root-relative path)
    /// against all patterns in order; the last pattern to match decides.
    pub fn is_ignored(&self, path: &str) -> bool {
        let path = normalize(path);
        let mut ignored = false;
        for pattern in &self.patterns {
            if pattern.regex.is_match(&path) {
                ignored = !pattern.negated;
            }
        }
        ignored
    }

    /// Whether a directory walker should skip descending into `dir_path`.
    pub fn should_skip_traversal(&self, dir_path: &str) -> bool {
        self.is_ignored(dir_path)
    }
}

/// Normalizes a path to forward slashes, as required before matching.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

fn compile_pattern(raw: &str) -> Result<CompiledPattern, IgnoreError> {
    let mut pattern = raw;
    let negated = if let Some(rest) = pattern.strip_prefix('!') {
        pattern = rest;
        true
    } else {
        false
    };

    let anchored = if let Some(rest) = pattern.strip_prefix('/') {
        pattern = rest;
        true
    } else {
        pattern.contains('/')
    };

    // A trailing slash marks "directory and everything under it"; we strip
    // it since the content-matching suffix below covers both file and
    // directory matches uniformly.
    let pattern = pattern.strip_suffix('/').unwrap_or(pattern);

    let body = translate_glob(pattern);
    let anchor_prefix = if anchored { "^" } else { "(?:^|/)" };
    let full = format!("{anchor_prefix}{body}(?:/.*)?$");

    let regex = Regex::new(&full).map_err(|source| IgnoreError::InvalidPattern {
        pattern: raw.to_string(),
        source,
    })?;

    Ok(CompiledPattern { negated, regex })
}

/// Translates one `.gitignore` glob (no leading `!`, no leading/trailing
/// `/`) into the body of a regex, escaping everything that isn't a glob
/// metacharacter.
fn translate_glob(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2);
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i] != ']' {
                    i += 1;
                }
                if i < chars.len() {
                    i += 1; // consume the closing ']'
                }
                let class: String = chars[start..i].iter().collect();
                if let Some(rest) = class.strip_prefix("[!") {
                    out.push_str(&format!("[^{rest}"));
                } else {
                    out.push_str(&class);
                }
            }
            c if "\\.+()|^$".contains(c) => {
                out.push('\\');
                out.push(c);
                i += 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_pattern_ignores_its_contents() {
        let matcher = IgnoreMatcher::new(&["build/".to_string()]).unwrap();
        assert!(matcher.is_ignored("build/out.js"));
        assert!(matcher.is_ignored("build"));
    }

    #[test]
    fn negation_re_includes_a_specific_file() {
        let patterns = vec!["build/".to_string(), "!build/keep.txt".to_string()];
        let matcher = IgnoreMatcher::new(&patterns).unwrap();

        assert!(matcher.is_ignored("build/out.js"));
        assert!(!matcher.is_ignored("build/keep.txt"));
    }

    #[test]
    fn last_match_wins_across_more_than_two_patterns() {
        let patterns = vec![
            "*.log".to_string(),
            "!important.log".to_string(),
            "important.log".to_string(),
        ];
        let matcher = IgnoreMatcher::new(&patterns).unwrap();

        // The final, most specific re-ignore wins even though a negation
        // appeared in between.
        assert!(matcher.is_ignored("important.log"));
        assert!(matcher.is_ignored("other.log"));
    }

    #[test]
    fn leading_slash_anchors_to_root() {
        let matcher = IgnoreMatcher::new(&["/target".to_string()]).unwrap();
        assert!(matcher.is_ignored("target"));
        assert!(matcher.is_ignored("target/debug/bin"));
        assert!(!matcher.is_ignored("crates/target"));
    }

    #[test]
    fn unanchored_pattern_matches_at_any_depth() {
        let matcher = IgnoreMatcher::new(&["node_modules".to_string()]).unwrap();
        assert!(matcher.is_ignored("node_modules"));
        assert!(matcher.is_ignored("packages/app/node_modules/lib.js"));
    }

    #[test]
    fn double_star_matches_across_segments() {
        let matcher = IgnoreMatcher::new(&["src/**/*.test.ts".to_string()]).unwrap();
        assert!(matcher.is_ignored("src/a/b/c.test.ts"));
        assert!(matcher.is_ignored("src/c.test.ts"));
        assert!(!matcher.is_ignored("src/c.ts"));
    }

    #[test]
    fn question_mark_matches_single_character() {
        let matcher = IgnoreMatcher::new(&["file?.txt".to_string()]).unwrap();
        assert!(matcher.is_ignored("file1.txt"));
        assert!(!matcher.is_ignored("file12.txt"));
    }

    #[test]
    fn character_class_and_negated_class() {
        let matcher = IgnoreMatcher::new(&["log[0-9].txt".to_string()]).unwrap();
        assert!(matcher.is_ignored("log5.txt"));
        assert!(!matcher.is_ignored("loga.txt"));

        let negated = IgnoreMatcher::new(&["file[!0-9].txt".to_string()]).unwrap();
        assert!(negated.is_ignored("filea.txt"));
        assert!(!negated.is_ignored("file5.txt"));
    }

    #[test]
    fn should_skip_traversal_matches_is_ignored_for_directories() {
        let matcher = IgnoreMatcher::new(&["build/".to_string()]).unwrap();
        assert!(matcher.should_skip_traversal("build"));
        assert!(!matcher.should_skip_traversal("src"));
    }

    #[test]
    fn invalid_character_class_surfaces_as_error() {
        // An unterminated class consumes to end of string and is harmless
        // as a literal; genuinely invalid regex syntax (e.g. a dangling
        // backslash class) should be reported rather than panicking.
        let err = IgnoreMatcher::new(&["a(b".to_string()]);
        assert!(err.is_ok(), "escaped metacharacters should compile fine");
    }
}
