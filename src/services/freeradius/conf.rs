//! Text-level editing of the FreeRADIUS configuration language
//!
//! The language is block structured (`name [arg] { ... }`), with `#`
//! comments and quoted strings. Edits keep every untouched byte of the file
//! as it was, and are idempotent: applying the same edit twice leaves the
//! file as the first application did.

use anyhow::Result;

/// Result of an edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Nothing to do
    Unchanged,
    /// New file content
    Changed(String),
    /// The section or block the edit targets does not exist
    Missing,
}

#[derive(Debug, Clone)]
struct LineInfo {
    /// Brace depth before the line
    depth: usize,
    opens: usize,
    closes: usize,
    /// Line text with any comment removed
    code: String,
}

impl LineInfo {
    fn depth_after(&self) -> usize {
        self.depth + self.opens - self.closes
    }
}

/// A section located by [`find_section`]: header and closing brace line indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub header_line: usize,
    pub close_line: usize,
    /// Depth of the section's direct contents
    pub inner_depth: usize,
}

/// A top-level `kind name { key = value ... }` stanza
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub header_line: usize,
    pub close_line: usize,
    pub entries: Vec<(String, String)>,
}

impl Block {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn split_lines(content: &str) -> Vec<&str> {
    content.split_inclusive('\n').collect()
}

fn scan(content: &str) -> Result<Vec<LineInfo>> {
    let mut infos = Vec::new();
    let mut depth = 0usize;

    for (idx, line) in split_lines(content).iter().enumerate() {
        let start_depth = depth;
        let mut opens = 0;
        let mut closes = 0;
        let mut code = String::new();
        let mut quote: Option<char> = None;
        let mut escaped = false;

        for ch in line.trim_end_matches(['\n', '\r']).chars() {
            if let Some(q) = quote {
                code.push(ch);
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
                continue;
            }
            match ch {
                '#' => break,
                '"' | '\'' | '`' => quote = Some(ch),
                '{' => {
                    opens += 1;
                    depth += 1;
                }
                '}' => {
                    if depth == 0 {
                        anyhow::bail!("Unbalanced '}}' on line {}", idx + 1);
                    }
                    closes += 1;
                    depth -= 1;
                }
                _ => {}
            }
            code.push(ch);
        }

        infos.push(LineInfo {
            depth: start_depth,
            opens,
            closes,
            code,
        });
    }

    if depth != 0 {
        anyhow::bail!("Unbalanced braces: {} block(s) never closed", depth);
    }
    Ok(infos)
}

/// Text before the first `{` of a header line
fn header_of(info: &LineInfo) -> Option<&str> {
    if info.opens == 0 {
        return None;
    }
    info.code.split('{').next().map(str::trim)
}

/// `pattern` tokens must equal the header's leading tokens
fn header_matches(header: &str, pattern: &str) -> bool {
    let mut header_tokens = header.split_whitespace();
    pattern
        .split_whitespace()
        .all(|p| header_tokens.next() == Some(p))
}

fn close_of(infos: &[LineInfo], header_line: usize) -> usize {
    let target = infos[header_line].depth;
    if infos[header_line].depth_after() == target {
        return header_line;
    }
    (header_line + 1..infos.len())
        .find(|&j| infos[j].depth_after() == target)
        .unwrap_or(infos.len() - 1)
}

fn find_in(infos: &[LineInfo], path: &[&str]) -> Option<Section> {
    let mut start = 0;
    let mut end = infos.len();
    let mut depth = 0;
    let mut found = None;

    for element in path {
        let header_line = (start..end).find(|&i| {
            infos[i].depth == depth
                && header_of(&infos[i]).is_some_and(|h| header_matches(h, element))
        })?;
        let close_line = close_of(infos, header_line);
        found = Some(Section {
            header_line,
            close_line,
            inner_depth: depth + 1,
        });
        start = header_line + 1;
        end = close_line;
        depth += 1;
    }
    found
}

/// Locate a nested section, e.g. `["server default", "authorize"]`
pub fn find_section(content: &str, path: &[&str]) -> Result<Option<Section>> {
    let infos = scan(content)?;
    Ok(find_in(&infos, path))
}

fn indentation(line: &str) -> &str {
    let trimmed = line.trim_start_matches([' ', '\t']);
    &line[..line.len() - trimmed.len()]
}

fn line_ending(line: &str) -> &str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

/// Make sure `directive` is an active statement directly inside the section
///
/// `-directive` (optional module) and `#directive` (commented out) are
/// rewritten in place; otherwise the directive is appended before the
/// section's closing brace.
pub fn ensure_directive(content: &str, path: &[&str], directive: &str) -> Result<Edit> {
    let infos = scan(content)?;
    let Some(section) = find_in(&infos, path) else {
        return Ok(Edit::Missing);
    };
    if section.close_line == section.header_line {
        anyhow::bail!(
            "Section '{}' is written on a single line and cannot be patched",
            path.join(" / ")
        );
    }

    let lines = split_lines(content);
    let optional = format!("-{}", directive);
    let mut optional_line = None;
    let mut commented_line = None;

    for i in section.header_line + 1..section.close_line {
        let info = &infos[i];
        if info.depth != section.inner_depth {
            continue;
        }
        let code = info.code.trim();
        if code == directive {
            return Ok(Edit::Unchanged);
        }
        if code == optional && optional_line.is_none() {
            optional_line = Some(i);
            continue;
        }
        if code.is_empty() && commented_line.is_none() {
            let raw = lines[i].trim();
            let uncommented = raw.trim_start_matches('#').trim();
            if raw.starts_with('#') && (uncommented == directive || uncommented == optional) {
                commented_line = Some(i);
            }
        }
    }

    let mut out: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
    let body_indent = format!("{}\t", indentation(lines[section.close_line]));
    if let Some(i) = optional_line {
        out[i] = format!(
            "{}{}{}",
            indentation(lines[i]),
            directive,
            line_ending(lines[i])
        );
    } else if let Some(i) = commented_line {
        // Comment markers usually sit in column 0; indent like the body
        out[i] = format!("{}{}{}", body_indent, directive, line_ending(lines[i]));
    } else {
        out.insert(section.close_line, format!("{}{}\n", body_indent, directive));
    }
    Ok(Edit::Changed(out.concat()))
}

/// Strip surrounding quotes; inside them a backslash escapes the next character
fn unquote(value: &str) -> String {
    let v = value.trim();
    let quoted = ['"', '\'']
        .into_iter()
        .any(|q| v.len() >= 2 && v.starts_with(q) && v.ends_with(q));
    if !quoted {
        return v.to_string();
    }

    let mut out = String::with_capacity(v.len());
    let mut chars = v[1..v.len() - 1].chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// All top-level stanzas of the given kind, e.g. every `client NAME { }`
pub fn list_blocks(content: &str, kind: &str) -> Result<Vec<Block>> {
    let infos = scan(content)?;
    let mut blocks = Vec::new();

    let mut i = 0;
    while i < infos.len() {
        let info = &infos[i];
        let header = if info.depth == 0 { header_of(info) } else { None };
        let Some(header) = header else {
            i += 1;
            continue;
        };
        let mut tokens = header.split_whitespace();
        let close_line = close_of(&infos, i);
        if tokens.next() == Some(kind) {
            if let Some(name) = tokens.next() {
                let entries = (i + 1..close_line)
                    .filter(|&j| infos[j].depth == 1)
                    .filter_map(|j| {
                        let (key, value) = infos[j].code.split_once('=')?;
                        let key = key.trim();
                        if key.is_empty() || key.contains(char::is_whitespace) {
                            return None;
                        }
                        Some((key.to_string(), unquote(value)))
                    })
                    .collect();
                blocks.push(Block {
                    name: name.to_string(),
                    header_line: i,
                    close_line,
                    entries,
                });
            }
        }
        i = close_line + 1;
    }
    Ok(blocks)
}

/// Insert or replace the top-level stanza `kind name`, `rendered` being the
/// full stanza text
pub fn upsert_block(content: &str, kind: &str, name: &str, rendered: &str) -> Result<Edit> {
    let blocks = list_blocks(content, kind)?;
    let mut rendered = rendered.to_string();
    if !rendered.ends_with('\n') {
        rendered.push('\n');
    }

    let lines = split_lines(content);
    if let Some(block) = blocks.iter().find(|b| b.name == name) {
        let existing: String = lines[block.header_line..=block.close_line].concat();
        if existing == rendered {
            return Ok(Edit::Unchanged);
        }
        let mut out = String::with_capacity(content.len() + rendered.len());
        out.push_str(&lines[..block.header_line].concat());
        out.push_str(&rendered);
        out.push_str(&lines[block.close_line + 1..].concat());
        return Ok(Edit::Changed(out));
    }

    let mut out = content.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    if !out.is_empty() && !out.ends_with("\n\n") {
        out.push('\n');
    }
    out.push_str(&rendered);
    Ok(Edit::Changed(out))
}

/// Remove the top-level stanza `kind name` and one blank line before it
pub fn remove_block(content: &str, kind: &str, name: &str) -> Result<Edit> {
    let blocks = list_blocks(content, kind)?;
    let Some(block) = blocks.iter().find(|b| b.name == name) else {
        return Ok(Edit::Missing);
    };

    let lines = split_lines(content);
    let mut start = block.header_line;
    if start > 0 && lines[start - 1].trim().is_empty() {
        start -= 1;
    }
    let mut out = lines[..start].concat();
    out.push_str(&lines[block.close_line + 1..].concat());
    Ok(Edit::Changed(out))
}

/// Flat files (one directive per line): append `line` unless present
pub fn ensure_line(content: &str, line: &str) -> Edit {
    let wanted = line.trim();
    if content.lines().any(|l| l.trim() == wanted) {
        return Edit::Unchanged;
    }
    let mut out = content.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(wanted);
    out.push('\n');
    Edit::Changed(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = "\
server default {
listen {
\ttype = auth
}
authorize {
\tfilter_username
\tpreprocess
\t-sql
\tpap
}
accounting {
\tdetail
#\tsql
}
session {
}
post-auth {
\t-sql
\tPost-Auth-Type REJECT {
\t\t-sql
\t\tattr_filter.access_reject
\t}
}
}
";

    fn apply(content: &str, edit: Edit) -> String {
        match edit {
            Edit::Changed(s) => s,
            Edit::Unchanged => content.to_string(),
            Edit::Missing => panic!("section missing"),
        }
    }

    #[test]
    fn test_find_nested_section() {
        let section = find_section(SITE, &["server default", "authorize"])
            .unwrap()
            .unwrap();
        assert_eq!(section.header_line, 4);
        assert_eq!(section.close_line, 9);
        assert_eq!(section.inner_depth, 2);
        assert!(find_section(SITE, &["server inner-tunnel"]).unwrap().is_none());
    }

    #[test]
    fn test_optional_module_becomes_active() {
        let out = apply(
            SITE,
            ensure_directive(SITE, &["server default", "authorize"], "sql").unwrap(),
        );
        assert!(out.contains("\tpreprocess\n\tsql\n\tpap\n"));
        assert!(!out[..out.find("accounting").unwrap()].contains("-sql"));
    }

    #[test]
    fn test_commented_directive_is_uncommented() {
        let out = apply(
            SITE,
            ensure_directive(SITE, &["server default", "accounting"], "sql").unwrap(),
        );
        assert!(out.contains("accounting {\n\tdetail\n\tsql\n}"));
    }

    #[test]
    fn test_missing_directive_is_inserted_before_close() {
        let out = apply(
            SITE,
            ensure_directive(SITE, &["server default", "session"], "sql").unwrap(),
        );
        assert!(out.contains("session {\n\tsql\n}"));
    }

    #[test]
    fn test_nested_subsection_is_left_alone() {
        let out = apply(
            SITE,
            ensure_directive(SITE, &["server default", "post-auth"], "sql").unwrap(),
        );
        assert!(out.contains("post-auth {\n\tsql\n"));
        assert!(out.contains("\t\t-sql\n"));
    }

    #[test]
    fn test_ensure_directive_is_idempotent() {
        let path = ["server default", "session"];
        let once = apply(SITE, ensure_directive(SITE, &path, "sql").unwrap());
        assert_eq!(ensure_directive(&once, &path, "sql").unwrap(), Edit::Unchanged);
    }

    #[test]
    fn test_missing_section() {
        let edit = ensure_directive(SITE, &["server default", "pre-proxy"], "sql").unwrap();
        assert_eq!(edit, Edit::Missing);
    }

    #[test]
    fn test_braces_in_comments_and_strings_are_ignored() {
        let content = "client a {\n\tsecret = \"x{y\" # }}}\n}\n";
        let blocks = list_blocks(content, "client").unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].get("secret"), Some("x{y"));
    }

    #[test]
    fn test_unbalanced_braces_are_rejected() {
        assert!(scan("a {\n").is_err());
        assert!(scan("}\n").is_err());
    }

    const CLIENTS: &str = "\
# clients.conf
client localhost {
\tipaddr = 127.0.0.1
\tsecret = testing123
}

client vpn {
\tipaddr = 10.0.0.1/32
\tsecret = 'abc'
\tnastype = other
}
";

    #[test]
    fn test_list_blocks() {
        let blocks = list_blocks(CLIENTS, "client").unwrap();
        let names: Vec<_> = blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["localhost", "vpn"]);
        assert_eq!(blocks[1].get("secret"), Some("abc"));
        assert_eq!(blocks[1].get("ipaddr"), Some("10.0.0.1/32"));
    }

    #[test]
    fn test_quoted_values_are_unescaped() {
        assert_eq!(unquote(r#""ab\\cd""#), r"ab\cd");
        assert_eq!(unquote(r#""say \"hi\"""#), r#"say "hi""#);
        assert_eq!(unquote(r"'it\'s'"), "it's");
        assert_eq!(unquote(r"plain\value"), r"plain\value");
    }

    #[test]
    fn test_upsert_replaces_existing_block() {
        let rendered = "client vpn {\n\tipaddr = 10.0.0.2\n\tsecret = new\n}\n";
        let out = apply(CLIENTS, upsert_block(CLIENTS, "client", "vpn", rendered).unwrap());
        assert!(out.contains("ipaddr = 10.0.0.2"));
        assert!(!out.contains("10.0.0.1/32"));
        assert!(out.starts_with("# clients.conf\nclient localhost {"));
        assert_eq!(
            upsert_block(&out, "client", "vpn", rendered).unwrap(),
            Edit::Unchanged
        );
    }

    #[test]
    fn test_upsert_appends_new_block() {
        let rendered = "client nas1 {\n\tipaddr = 192.0.2.1\n}";
        let out = apply(CLIENTS, upsert_block(CLIENTS, "client", "nas1", rendered).unwrap());
        assert!(out.ends_with("}\n\nclient nas1 {\n\tipaddr = 192.0.2.1\n}\n"));
        assert_eq!(list_blocks(&out, "client").unwrap().len(), 3);
    }

    #[test]
    fn test_remove_block() {
        let out = apply(CLIENTS, remove_block(CLIENTS, "client", "vpn").unwrap());
        assert_eq!(out, "# clients.conf\nclient localhost {\n\tipaddr = 127.0.0.1\n\tsecret = testing123\n}\n");
        assert_eq!(remove_block(&out, "client", "vpn").unwrap(), Edit::Missing);
    }

    #[test]
    fn test_ensure_line() {
        let conf = "port 1194\nproto udp";
        let out = apply(conf, ensure_line(conf, "plugin /x.so /y.cnf"));
        assert_eq!(out, "port 1194\nproto udp\nplugin /x.so /y.cnf\n");
        assert_eq!(ensure_line(&out, "plugin /x.so /y.cnf"), Edit::Unchanged);
    }
}
