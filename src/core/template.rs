//! Placeholder substitution
//!
//! Recipes refer to layout values with `{name}` placeholders (`{prefix}`,
//! `{version}`, `{sysroot}`, ...). Unknown placeholders are left untouched so
//! shell snippets using braces pass through.

use std::collections::BTreeMap;

/// Named values available to a template
pub type Vars = BTreeMap<&'static str, String>;

/// Replace every known `{name}` in `template`
pub fn render(template: &str, vars: &Vars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                if let Some(value) = vars.get(name) {
                    out.push_str(value);
                } else {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
