//! URI template matching for resource templates
//!
//! Supports `{var}` (a single path segment) and `{+var}` (may span `/`). Each template is
//! compiled once into an anchored regex at registration time.

use std::collections::HashMap;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriTemplateError {
    #[error("unbalanced braces in uri template `{0}`")]
    UnbalancedBraces(String),
    #[error("empty variable name in uri template `{0}`")]
    EmptyVariable(String),
    #[error("invalid variable name `{name}` in uri template `{template}`")]
    InvalidVariable { template: String, name: String },
}

#[derive(Debug, Clone)]
pub struct UriTemplate {
    template: String,
    pattern: Regex,
    variables: Vec<String>,
}

impl UriTemplate {
    pub fn parse(template: &str) -> Result<Self, UriTemplateError> {
        let mut pattern = String::from("^");
        let mut variables = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find(['{', '}']) {
            if rest.as_bytes()[open] == b'}' {
                return Err(UriTemplateError::UnbalancedBraces(template.to_string()));
            }

            pattern.push_str(&regex::escape(&rest[..open]));
            let after_open = &rest[open + 1..];
            let close = after_open
                .find(['{', '}'])
                .filter(|index| after_open.as_bytes()[*index] == b'}')
                .ok_or_else(|| UriTemplateError::UnbalancedBraces(template.to_string()))?;

            let expression = &after_open[..close];
            let (reserved, name) = match expression.strip_prefix('+') {
                Some(name) => (true, name),
                None => (false, expression),
            };

            if name.is_empty() {
                return Err(UriTemplateError::EmptyVariable(template.to_string()));
            }
            if !name
                .chars()
                .all(|character| character.is_ascii_alphanumeric() || character == '_')
            {
                return Err(UriTemplateError::InvalidVariable {
                    template: template.to_string(),
                    name: name.to_string(),
                });
            }

            pattern.push_str(if reserved { "(.+?)" } else { "([^/]+?)" });
            variables.push(name.to_string());
            rest = &after_open[close + 1..];
        }

        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        let pattern = Regex::new(&pattern)
            .map_err(|_| UriTemplateError::UnbalancedBraces(template.to_string()))?;

        Ok(Self {
            template: template.to_string(),
            pattern,
            variables,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Extracts variable bindings when `uri` lines up with the template's literal parts.
    pub fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let captures = self.pattern.captures(uri)?;
        Some(
            self.variables
                .iter()
                .enumerate()
                .filter_map(|(index, name)| {
                    captures
                        .get(index + 1)
                        .map(|value| (name.clone(), value.as_str().to_string()))
                })
                .collect(),
        )
    }
}

/// Returns the first template, in iteration order, that matches `uri`.
pub fn match_first<'a, T, I, F>(
    candidates: I,
    template_of: F,
    uri: &str,
) -> Option<(&'a T, HashMap<String, String>)>
where
    I: IntoIterator<Item = &'a T>,
    F: Fn(&T) -> &UriTemplate,
    T: 'a,
{
    candidates
        .into_iter()
        .find_map(|candidate| template_of(candidate).matches(uri).map(|vars| (candidate, vars)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_segment_variable() {
        let template = UriTemplate::parse("file:///logs/{name}.log").expect("valid template");
        let vars = template.matches("file:///logs/x.log").expect("should match");
        assert_eq!(vars.get("name").map(String::as_str), Some("x"));
    }

    #[test]
    fn single_segment_variable_does_not_cross_slashes() {
        let template = UriTemplate::parse("file:///logs/{name}.log").expect("valid template");
        assert!(template.matches("file:///logs/a/b.log").is_none());
    }

    #[test]
    fn reserved_variable_spans_slashes() {
        let template = UriTemplate::parse("file:///{+path}").expect("valid template");
        let vars = template.matches("file:///a/b/c.txt").expect("should match");
        assert_eq!(vars.get("path").map(String::as_str), Some("a/b/c.txt"));
    }

    #[test]
    fn extracts_multiple_variables() {
        let template =
            UriTemplate::parse("repo://{owner}/{repo}/issues/{id}").expect("valid template");
        let vars = template
            .matches("repo://acme/widgets/issues/42")
            .expect("should match");
        assert_eq!(vars.len(), 3);
        assert_eq!(vars["owner"], "acme");
        assert_eq!(vars["repo"], "widgets");
        assert_eq!(vars["id"], "42");
    }

    #[test]
    fn literal_mismatch_is_rejected() {
        let template = UriTemplate::parse("file:///logs/{name}.log").expect("valid template");
        assert!(template.matches("file:///logs/x.txt").is_none());
        assert!(template.matches("http:///logs/x.log").is_none());
    }

    #[test]
    fn regex_metacharacters_in_literals_are_escaped() {
        let template = UriTemplate::parse("db://q?table={table}").expect("valid template");
        assert!(template.matches("db://q?table=users").is_some());
        assert!(template.matches("db://qtable=users").is_none());
    }

    #[test]
    fn malformed_templates_fail_to_parse() {
        assert!(matches!(
            UriTemplate::parse("file:///{name"),
            Err(UriTemplateError::UnbalancedBraces(_))
        ));
        assert!(matches!(
            UriTemplate::parse("file:///name}"),
            Err(UriTemplateError::UnbalancedBraces(_))
        ));
        assert!(matches!(
            UriTemplate::parse("file:///{}"),
            Err(UriTemplateError::EmptyVariable(_))
        ));
    }

    #[test]
    fn first_matching_template_wins() {
        let templates = vec![
            UriTemplate::parse("docs://{section}/intro").expect("valid"),
            UriTemplate::parse("docs://{a}/{b}").expect("valid"),
        ];
        let (winner, vars) =
            match_first(templates.iter(), |t| t, "docs://guide/intro").expect("should match");
        assert_eq!(winner.as_str(), "docs://{section}/intro");
        assert_eq!(vars["section"], "guide");
    }
}
