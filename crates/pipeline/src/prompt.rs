//! Prompt templates with `{name}` placeholders
//!
//! `{{` and `}}` produce literal braces.

use std::collections::HashMap;
use textgen_common::error::{Result, TextgenError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Variable(String),
}

/// A parsed prompt template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse a template such as `"Question: {question}\n\nAnswer: "`
    pub fn from_template(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => {
                                return Err(TextgenError::invalid_input(format!(
                                    "Unclosed placeholder in template: {}",
                                    template
                                )))
                            }
                        }
                    }
                    let name = name.trim();
                    if name.is_empty() || name.contains('{') {
                        return Err(TextgenError::invalid_input(format!(
                            "Invalid placeholder in template: {}",
                            template
                        )));
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Variable(name.to_string()));
                }
                '}' => {
                    return Err(TextgenError::invalid_input(format!(
                        "Unmatched '}}' in template: {}",
                        template
                    )))
                }
                c => text.push(c),
            }
        }

        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Ok(Self { segments })
    }

    /// Placeholder names in order of first appearance
    pub fn variables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Variable(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Substitute every placeholder
    pub fn format(&self, values: &HashMap<String, String>) -> Result<String> {
        let mut output = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Variable(name) => {
                    let value = values.get(name).ok_or_else(|| {
                        TextgenError::invalid_input(format!("Missing template variable: {}", name))
                    })?;
                    output.push_str(value);
                }
            }
        }
        Ok(output)
    }
}
