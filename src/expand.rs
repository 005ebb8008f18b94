/*
 * Copyright 2025 OpenStudioLandscapes Contributors
 */

use std::collections::HashMap;

use anyhow::{bail, Result};

pub type Variables = HashMap<String, String>;

/**
 * A parsed bootstrap script template.  Templates are shell scripts with a
 * small set of substitutions; because the scripts themselves are full of
 * shell expansions, a literal dollar sign must be written as "$$".
 */
#[derive(Debug)]
pub struct Template {
    chunks: Vec<Chunk>,
}

#[derive(Debug, PartialEq)]
enum Chunk {
    Text(String),
    Simple(String),
    Quoted(String),
    IfLiteral(String, String),
}

fn is_variable_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

impl Chunk {
    /*
     * The text between "${" and "}":
     *
     *  name            the value of "name"; it must be defined
     *  name!           the value of "name", quoted for the shell
     *  name?literal    "literal" if "name" is defined, otherwise nothing
     */
    fn expansion(body: &str) -> Result<Chunk> {
        if body.contains('$') {
            bail!("nested expansion in ${{{}}}", body);
        }

        let end = body.find(|c: char| !is_variable_char(c))
            .unwrap_or_else(|| body.len());
        let (name, rest) = body.split_at(end);
        if name.is_empty() {
            bail!("expansion ${{{}}} has no variable name", body);
        }
        let name = name.to_string();

        if rest.is_empty() {
            Ok(Chunk::Simple(name))
        } else if rest == "!" {
            Ok(Chunk::Quoted(name))
        } else if let Some(literal) = rest.strip_prefix('?') {
            Ok(Chunk::IfLiteral(name, literal.to_string()))
        } else {
            bail!("unexpected {:?} in expansion ${{{}}}", rest, body);
        }
    }
}

impl Template {
    pub fn parse(template: &str) -> Result<Template> {
        let mut chunks = Vec::new();
        let mut text = String::new();
        let mut rest = template;

        while let Some(i) = rest.find('$') {
            text.push_str(&rest[..i]);
            let after = &rest[i + 1..];

            if let Some(tail) = after.strip_prefix('$') {
                text.push('$');
                rest = tail;
            } else if let Some(tail) = after.strip_prefix('{') {
                let close = match tail.find('}') {
                    Some(close) => close,
                    None => bail!("unterminated \"${{\" in template"),
                };
                if !text.is_empty() {
                    chunks.push(Chunk::Text(std::mem::take(&mut text)));
                }
                chunks.push(Chunk::expansion(&tail[..close])?);
                rest = &tail[close + 1..];
            } else {
                match after.chars().next() {
                    Some(c) => bail!("\"$\" must be followed by \"$\" or \"{{\", \
                        not {:?}", c),
                    None => bail!("template ends with a lone \"$\""),
                }
            }
        }

        text.push_str(rest);
        if !text.is_empty() {
            chunks.push(Chunk::Text(text));
        }
        Ok(Template { chunks })
    }

    /**
     * Names of all variables the template refers to, in order of first use.
     */
    pub fn variables(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for ch in self.chunks.iter() {
            let name = match ch {
                Chunk::Text(_) => continue,
                Chunk::Simple(n) | Chunk::Quoted(n) => n,
                Chunk::IfLiteral(n, _) => n,
            };
            if !out.contains(&name.as_str()) {
                out.push(name);
            }
        }
        out
    }

    pub fn evaluate(&self, variables: &Variables) -> Result<String> {
        fn value<'a>(variables: &'a Variables, name: &str) -> Result<&'a str> {
            match variables.get(name) {
                Some(v) => Ok(v.as_str()),
                None => bail!("variable {:?} not defined", name),
            }
        }

        let mut out = String::new();
        for ch in self.chunks.iter() {
            match ch {
                Chunk::Text(t) => out.push_str(t),
                Chunk::Simple(n) => out.push_str(value(variables, n)?),
                Chunk::Quoted(n) => {
                    out.push_str(&shell_words::quote(value(variables, n)?))
                }
                Chunk::IfLiteral(n, l) if variables.contains_key(n) => {
                    out.push_str(l)
                }
                Chunk::IfLiteral(..) => (),
            }
        }

        Ok(out)
    }
}

/**
 * Parse and evaluate a template in one go.
 */
pub fn render(template: &str, variables: &Variables) -> Result<String> {
    Template::parse(template)?.evaluate(variables)
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars(list: &[(&str, &str)]) -> Variables {
        list.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn simple_and_dollar() {
        let v = vars(&[("dir", "/srv/landscapes")]);
        let out = render("cd ${dir} && echo $$HOME", &v).unwrap();
        assert_eq!(out, "cd /srv/landscapes && echo $HOME");
    }

    #[test]
    fn shell_variable_needs_escape() {
        let v = vars(&[]);
        let out = render("echo \"$${UBUNTU_CODENAME:-x}\"", &v).unwrap();
        assert_eq!(out, "echo \"${UBUNTU_CODENAME:-x}\"");
        assert!(render("echo $HOME", &v).is_err());
    }

    #[test]
    fn quoted_expansion() {
        let v = vars(&[("a", "plain"), ("b", "has space"), ("c", "it's")]);
        assert_eq!(render("${a!}", &v).unwrap(), "plain");
        assert_eq!(render("${b!}", &v).unwrap(), "'has space'");
        assert_eq!(render("${c!}", &v).unwrap(), "'it'\\''s'");
    }

    #[test]
    fn conditional_literal() {
        let set = vars(&[("ssh", "")]);
        let unset = vars(&[]);
        assert_eq!(render("a${ssh?-s}b", &set).unwrap(), "a-sb");
        assert_eq!(render("a${ssh?-s}b", &unset).unwrap(), "ab");
    }

    #[test]
    fn undefined_variable() {
        let e = render("${nope}", &vars(&[])).unwrap_err();
        assert!(e.to_string().contains("nope"));
    }

    #[test]
    fn malformed_templates() {
        assert!(Template::parse("${}").is_err());
        assert!(Template::parse("${?x}").is_err());
        assert!(Template::parse("${a!b}").is_err());
        assert!(Template::parse("${a").is_err());
        assert!(Template::parse("${a${b}}").is_err());
        assert!(Template::parse("trailing $").is_err());
        assert!(Template::parse("${a b}").is_err());
    }

    #[test]
    fn lists_variables_once() {
        let t = Template::parse("${a} ${b!} ${a?x} $$c").unwrap();
        assert_eq!(t.variables(), vec!["a", "b"]);
    }
}
