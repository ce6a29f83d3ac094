//! Scans an input string (an output file map) character by character.

use std::path::Path;

#[derive(Debug)]
pub struct ParseError {
    msg: String,
    ofs: usize,
}
pub type ParseResult<T> = Result<T, ParseError>;

pub struct Scanner<'a> {
    text: &'a str,
    pub ofs: usize,
    pub line: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(text: &'a str) -> Self {
        Scanner {
            text,
            ofs: 0,
            line: 1,
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[start..end]
    }

    /// The byte at the cursor as a char, or '\0' past the end.
    pub fn peek(&self) -> char {
        self.text
            .as_bytes()
            .get(self.ofs)
            .map(|&b| b as char)
            .unwrap_or('\0')
    }
    pub fn at_end(&self) -> bool {
        self.ofs >= self.text.len()
    }
    pub fn peek_newline(&self) -> bool {
        match self.peek() {
            '\n' => true,
            '\r' => self.text.as_bytes().get(self.ofs + 1) == Some(&b'\n'),
            _ => false,
        }
    }
    pub fn next(&mut self) {
        if self.at_end() {
            panic!("scanned past end")
        }
        if self.peek() == '\n' {
            self.line += 1;
        }
        self.ofs += 1;
    }
    pub fn back(&mut self) {
        if self.ofs == 0 {
            panic!("back at start")
        }
        self.ofs -= 1;
        if self.peek() == '\n' {
            self.line -= 1;
        }
    }
    pub fn read(&mut self) -> char {
        let c = self.peek();
        if !self.at_end() {
            self.next();
        }
        c
    }
    pub fn skip(&mut self, ch: char) -> bool {
        if !self.at_end() && self.peek() == ch {
            self.next();
            return true;
        }
        false
    }

    pub fn skip_spaces(&mut self) {
        while self.skip(' ') || self.skip('\t') {}
    }

    /// Skips to the end of the current line, leaving the newline unread.
    pub fn skip_to_newline(&mut self) {
        while !self.at_end() && !self.peek_newline() {
            self.next();
        }
    }

    pub fn expect(&mut self, ch: char) -> ParseResult<()> {
        if self.at_end() {
            return self.parse_error(format!("expected {:?}, got end of file", ch));
        }
        let r = self.read();
        if r != ch {
            self.back();
            return self.parse_error(format!("expected {:?}, got {:?}", ch, r));
        }
        Ok(())
    }

    pub fn parse_error<T, S: Into<String>>(&self, msg: S) -> ParseResult<T> {
        Err(ParseError {
            msg: msg.into(),
            ofs: self.ofs,
        })
    }

    pub fn format_parse_error(&self, filename: &Path, err: ParseError) -> String {
        let mut ofs = 0;
        for (line_number, line) in self.text.split('\n').enumerate() {
            if ofs + line.len() >= err.ofs {
                let mut msg = "parse error: ".to_string();
                msg.push_str(&err.msg);
                msg.push('\n');

                let prefix = format!("{}:{}: ", filename.display(), line_number + 1);
                msg.push_str(&prefix);

                let col = err.ofs - ofs;
                let context: String = line.chars().take(60).collect();
                msg.push_str(context.trim_end_matches('\r'));
                if line.len() > context.len() {
                    msg.push_str("...");
                }
                msg.push('\n');

                msg.push_str(&" ".repeat(prefix.len() + col.min(60)));
                msg.push_str("^\n");
                return msg;
            }
            ofs += line.len() + 1;
        }
        format!("parse error: {}\n{}: at end of file\n", err.msg, filename.display())
    }
}
