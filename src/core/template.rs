//! Output line template for comments.
//!
//! Templates substitute a fixed set of named fields, e.g.
//! `{offsetSeconds}\t{commenterName}: {messageBody}`. `{{` and `}}` produce
//! literal braces. Anything else inside braces is rejected when the template
//! is compiled, so a bad `CommentFormat` fails before any download starts.

use crate::core::models::Comment;
use std::io;

pub const DEFAULT_COMMENT_FORMAT: &str = "{offsetSeconds}\t{commenterName}: {messageBody}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    OffsetSeconds,
    CommenterName,
    CommenterDisplayName,
    MessageBody,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "offsetSeconds" => Some(Field::OffsetSeconds),
            "commenterName" => Some(Field::CommenterName),
            "commenterDisplayName" => Some(Field::CommenterDisplayName),
            "messageBody" => Some(Field::MessageBody),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(Field),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentTemplate {
    segments: Vec<Segment>,
}

impl CommentTemplate {
    pub fn compile(format: &str) -> io::Result<Self> {
        let invalid = |msg: String| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid CommentFormat '{format}': {msg}"),
            )
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = format.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => return Err(invalid("unclosed '{'".to_string())),
                        }
                    }
                    let field = Field::from_name(name.trim())
                        .ok_or_else(|| invalid(format!("unknown field '{name}'")))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' => return Err(invalid("unmatched '}'".to_string())),
                _ => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, comment: &Comment) -> String {
        let mut line = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => line.push_str(text),
                Segment::Field(Field::OffsetSeconds) => {
                    line.push_str(&comment.offset_seconds.to_string())
                }
                Segment::Field(Field::CommenterName) => line.push_str(&comment.commenter_name),
                Segment::Field(Field::CommenterDisplayName) => {
                    line.push_str(&comment.commenter_display_name)
                }
                Segment::Field(Field::MessageBody) => line.push_str(&comment.message_body),
            }
        }
        line
    }
}

impl Default for CommentTemplate {
    fn default() -> Self {
        Self {
            segments: vec![
                Segment::Field(Field::OffsetSeconds),
                Segment::Literal("\t".to_string()),
                Segment::Field(Field::CommenterName),
                Segment::Literal(": ".to_string()),
                Segment::Field(Field::MessageBody),
            ],
        }
    }
}
