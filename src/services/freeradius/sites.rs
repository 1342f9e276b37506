//! Turning on the `sql` module in the virtual servers

use super::conf::{self, Edit};
use super::paths::ConfigLayout;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Sections of `sites-available/default` that consult SQL
pub const DEFAULT_SECTIONS: &[&str] = &["authorize", "accounting", "session", "post-auth"];

/// Sections of `sites-available/inner-tunnel` that consult SQL
pub const INNER_TUNNEL_SECTIONS: &[&str] = &["authorize", "session", "post-auth"];

/// What happened to one section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionPatch {
    pub section: String,
    pub changed: bool,
    pub missing: bool,
}

/// Apply `directive` to each listed section of a site file.
///
/// Sections are looked up under `server <name> { }` first and at top level
/// second, which covers both the v3 layout and older flat site files. The
/// file is only rewritten when something changed.
pub fn ensure_in_sections(
    path: &Path,
    server: &str,
    sections: &[&str],
    directive: &str,
) -> Result<Vec<SectionPatch>> {
    let mut content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let server_header = format!("server {}", server);
    let mut results = Vec::new();
    let mut dirty = false;

    for &section in sections {
        let mut edit = conf::ensure_directive(&content, &[server_header.as_str(), section], directive)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if edit == Edit::Missing {
            edit = conf::ensure_directive(&content, &[section], directive)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
        }

        let mut patch = SectionPatch {
            section: section.to_string(),
            changed: false,
            missing: false,
        };
        match edit {
            Edit::Changed(new) => {
                content = new;
                patch.changed = true;
                dirty = true;
            }
            Edit::Unchanged => {}
            Edit::Missing => {
                tracing::warn!(file = %path.display(), section, "section not found");
                patch.missing = true;
            }
        }
        results.push(patch);
    }

    if dirty {
        fs::write(path, &content).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(results)
}

/// Enable `sql` in the default and inner-tunnel servers
pub fn enable_sql(layout: &ConfigLayout) -> Result<Vec<SectionPatch>> {
    let mut results = ensure_in_sections(&layout.site_default(), "default", DEFAULT_SECTIONS, "sql")?;

    let inner = layout.site_inner_tunnel();
    if inner.exists() {
        results.extend(ensure_in_sections(&inner, "inner-tunnel", INNER_TUNNEL_SECTIONS, "sql")?);
    } else {
        tracing::debug!(file = %inner.display(), "no inner-tunnel site, skipping");
    }
    Ok(results)
}

/// Whether the default server's authorize section calls `sql`
pub fn sql_in_default_authorize(layout: &ConfigLayout) -> Result<bool> {
    let path = layout.site_default();
    let content =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut edit = conf::ensure_directive(&content, &["server default", "authorize"], "sql")?;
    if edit == Edit::Missing {
        edit = conf::ensure_directive(&content, &["authorize"], "sql")?;
    }
    Ok(edit == Edit::Unchanged)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_SITE: &str = "\
server default {
authorize {
\tpreprocess
\t-sql
\tpap
}
authenticate {
\tAuth-Type PAP {
\t\tpap
\t}
}
accounting {
\tdetail
\t-sql
}
session {
}
post-auth {
\t-sql
}
}
";

    fn layout_with_site(dir: &Path, site: &str) -> ConfigLayout {
        let layout = ConfigLayout::new(dir);
        fs::create_dir_all(dir.join("sites-available")).unwrap();
        fs::write(layout.site_default(), site).unwrap();
        layout
    }

    #[test]
    fn test_enable_sql_patches_all_sections_once() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_with_site(dir.path(), DEFAULT_SITE);

        assert!(!sql_in_default_authorize(&layout).unwrap());
        let results = enable_sql(&layout).unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.changed && !r.missing));
        assert!(sql_in_default_authorize(&layout).unwrap());

        let patched = fs::read_to_string(layout.site_default()).unwrap();
        assert!(!patched.contains("-sql"));
        assert_eq!(patched.matches("\tsql\n").count(), 4);

        let again = enable_sql(&layout).unwrap();
        assert!(again.iter().all(|r| !r.changed));
        assert_eq!(fs::read_to_string(layout.site_default()).unwrap(), patched);
    }

    #[test]
    fn test_flat_site_without_server_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_with_site(dir.path(), "authorize {\n\t-sql\n}\naccounting {\n}\n");

        let results = enable_sql(&layout).unwrap();
        let missing: Vec<_> = results.iter().filter(|r| r.missing).map(|r| r.section.as_str()).collect();
        assert_eq!(missing, vec!["session", "post-auth"]);
        let patched = fs::read_to_string(layout.site_default()).unwrap();
        assert_eq!(patched, "authorize {\n\tsql\n}\naccounting {\n\tsql\n}\n");
    }

    #[test]
    fn test_inner_tunnel_is_patched_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_with_site(dir.path(), DEFAULT_SITE);
        fs::write(
            layout.site_inner_tunnel(),
            "server inner-tunnel {\nauthorize {\n\t-sql\n}\nsession {\n}\npost-auth {\n}\n}\n",
        )
        .unwrap();

        let results = enable_sql(&layout).unwrap();
        assert_eq!(results.len(), 7);
        let inner = fs::read_to_string(layout.site_inner_tunnel()).unwrap();
        assert_eq!(inner.matches("\tsql\n").count(), 3);
    }
}
