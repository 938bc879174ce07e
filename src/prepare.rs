//! Source tokenizer: compiles program text into the executable token
//! stream.
//!
//! Each physical line becomes its line record plus a run of tokens ended
//! by [`Token::Eol`]; the stream ends with [`Token::Eof`]. Keywords are
//! matched greedily and case-sensitively, so lowercase names never collide
//! with them. Line numbers appearing after `GOTO`, `GOSUB`, `RESTORE`,
//! `THEN`, `ELSE` and in `ON` target lists become unresolved
//! [`Token::LineRef`] operands; everything else numeric is a constant.

use crate::{
    token::{DataBlock, Function, LineEntry, Pc, Program, Token},
    symbols::static_slot,
    Error,
};
use alloc::{format, string::String, vec::Vec};

/// Gap used when a source line carries no line number of its own.
const AUTO_NUMBER_STEP: u16 = 10;

/// Compiles a whole program.
pub(crate) fn compile(source: &str) -> Result<Program, Error> {
    let mut program = Program::default();
    compile_into(&mut program, source)?;
    program.code.push(Token::Eof);
    Ok(program)
}

/// Appends a library to an already compiled program and returns its index.
pub(crate) fn append_library(program: &mut Program, source: &str) -> Result<usize, Error> {
    let start = program.code.len() as Pc;
    compile_into(program, source)?;
    program.code.push(Token::Eof);
    let end = program.code.len() as Pc;
    program.library_ranges.push((start, end));
    Ok(program.library_ranges.len() - 1)
}

/// Tokenizes a detached expression fragment (a `DATA` item) onto the end
/// of the code vector, returning its start. The caller evaluates it and
/// truncates the code back.
pub(crate) fn append_scratch(program: &mut Program, text: &str) -> Result<Pc, Error> {
    let start = program.code.len() as Pc;
    let mut lexer = Lexer::new(program, text, 0);
    if let Err(error) = lexer.run() {
        program.code.truncate(start as usize);
        return Err(error);
    }
    program.code.push(Token::Eol);
    Ok(start)
}

fn compile_into(program: &mut Program, source: &str) -> Result<(), Error> {
    let mut auto_number: u16 = 0;
    for raw_line in source.lines() {
        let trimmed = raw_line.trim_start();
        if trimmed.is_empty() {
            continue;
        }
        let digits: usize = trimmed.bytes().take_while(u8::is_ascii_digit).count();
        let (number, rest) = if digits > 0 {
            let number = trimmed[..digits]
                .parse::<u16>()
                .map_err(|_| Error::Program(format!("line number out of range: {}", trimmed)))?;
            (number, &trimmed[digits..])
        } else {
            (auto_number.saturating_add(AUTO_NUMBER_STEP), trimmed)
        };
        auto_number = number;
        let pc = program.code.len() as Pc;
        program.lines.push(LineEntry {
            number,
            pc,
            source: raw_line.into(),
        });
        let mut lexer = Lexer::new(program, rest, number);
        lexer.run()?;
        program.code.push(Token::Eol);
    }
    Ok(())
}

/// Keyword table, longest spellings first so the greedy match is stable.
/// Keywords that always take an argument list keep their `(` and are
/// emitted as the function token followed by [`Token::LParen`].
const KEYWORDS: &[(&str, Kw)] = &[
    ("OTHERWISE", Kw::Plain(Token::Otherwise)),
    ("STRING$(", Kw::FuncParen(Function::StringRep)),
    ("ENDWHILE", Kw::Plain(Token::Endwhile)),
    ("ENDPROC", Kw::Plain(Token::Endproc)),
    ("ENDCASE", Kw::Plain(Token::Endcase)),
    ("LIBRARY", Kw::Plain(Token::Library)),
    ("REPORT$", Kw::Func(Function::ReportStr)),
    ("RESTORE", Kw::Restore),
    ("RIGHT$(", Kw::FuncParen(Function::Right)),
    ("ENDIF", Kw::Plain(Token::Endif)),
    ("ERROR", Kw::Plain(Token::Error)),
    ("GOSUB", Kw::Goto(Token::Gosub)),
    ("INPUT", Kw::Input),
    ("INSTR(", Kw::FuncParen(Function::Instr)),
    ("LEFT$(", Kw::FuncParen(Function::Left)),
    ("LOCAL", Kw::Plain(Token::Local)),
    ("OSCLI", Kw::Plain(Token::Oscli)),
    ("PRINT", Kw::Plain(Token::Print)),
    ("REPEAT", Kw::Plain(Token::Repeat)),
    ("REPORT", Kw::Plain(Token::Report)),
    ("RETURN", Kw::Plain(Token::Return)),
    ("CLEAR", Kw::Plain(Token::Clear)),
    ("UNTIL", Kw::Plain(Token::Until)),
    ("WHILE", Kw::Plain(Token::While)),
    ("FALSE", Kw::Func(Function::False)),
    ("HIMEM", Kw::Plain(Token::Himem)),
    ("MID$(", Kw::FuncParen(Function::Mid)),
    ("CHR$", Kw::Func(Function::Chr)),
    ("DATA", Kw::Data),
    ("CASE", Kw::Plain(Token::Case)),
    ("ELSE", Kw::LineCtx(Token::Else)),
    ("GOTO", Kw::Goto(Token::Goto)),
    ("LINE", Kw::Line),
    ("NEXT", Kw::Plain(Token::Next)),
    ("QUIT", Kw::Plain(Token::Quit)),
    ("READ", Kw::Plain(Token::Read)),
    ("STEP", Kw::Plain(Token::Step)),
    ("STOP", Kw::Plain(Token::Stop)),
    ("STR$", Kw::Func(Function::Str)),
    ("SWAP", Kw::Plain(Token::Swap)),
    ("TAB(", Kw::FuncParen(Function::Tab)),
    ("THEN", Kw::LineCtx(Token::Then)),
    ("TIME", Kw::Func(Function::Time)),
    ("TRUE", Kw::Func(Function::True)),
    ("WAIT", Kw::Plain(Token::Wait)),
    ("WHEN", Kw::Plain(Token::When)),
    ("PROC", Kw::Proc),
    ("ABS", Kw::Func(Function::Abs)),
    ("ACS", Kw::Func(Function::Acs)),
    ("AND", Kw::Plain(Token::And)),
    ("ASC", Kw::Func(Function::Asc)),
    ("ASN", Kw::Func(Function::Asn)),
    ("ATN", Kw::Func(Function::Atn)),
    ("COS", Kw::Func(Function::Cos)),
    ("DEF", Kw::Plain(Token::Def)),
    ("DEG", Kw::Func(Function::Deg)),
    ("DIM", Kw::Plain(Token::Dim)),
    ("DIV", Kw::Plain(Token::Div)),
    ("END", Kw::Plain(Token::End)),
    ("EOR", Kw::Plain(Token::Eor)),
    ("ERL", Kw::Func(Function::Erl)),
    ("ERR", Kw::Func(Function::Err)),
    ("EXP", Kw::Func(Function::Exp)),
    ("FOR", Kw::Plain(Token::For)),
    ("INT", Kw::Func(Function::Int)),
    ("LEN", Kw::Func(Function::Len)),
    ("LET", Kw::Plain(Token::Let)),
    ("LOG", Kw::Func(Function::Log)),
    ("MOD", Kw::Plain(Token::Mod)),
    ("NOT", Kw::Plain(Token::Not)),
    ("OFF", Kw::Plain(Token::Off)),
    ("POS", Kw::Func(Function::Pos)),
    ("RAD", Kw::Func(Function::Rad)),
    ("REM", Kw::Rem),
    ("RND", Kw::Rnd),
    ("RUN", Kw::Plain(Token::Run)),
    ("SGN", Kw::Func(Function::Sgn)),
    ("SIN", Kw::Func(Function::Sin)),
    ("SPC", Kw::Func(Function::Spc)),
    ("SQR", Kw::Func(Function::Sqr)),
    ("TAN", Kw::Func(Function::Tan)),
    ("VAL", Kw::Func(Function::Val)),
    ("FN", Kw::Fn),
    ("IF", Kw::Plain(Token::If)),
    ("LN", Kw::Func(Function::Ln)),
    ("OF", Kw::Plain(Token::Of)),
    ("ON", Kw::Plain(Token::On)),
    ("OR", Kw::Plain(Token::Or)),
    ("PI", Kw::Func(Function::Pi)),
    ("TO", Kw::Plain(Token::To)),
];

/// What a keyword match turns into.
enum Kw {
    Plain(Token),
    /// Nullary or prefix function.
    Func(Function),
    /// Function whose keyword includes the opening parenthesis.
    FuncParen(Function),
    /// `GOTO`/`GOSUB`: following numbers are line references.
    Goto(Token),
    /// `THEN`/`ELSE`: a directly following number is a line reference.
    LineCtx(Token),
    Restore,
    Data,
    Rem,
    Rnd,
    Proc,
    Fn,
    Input,
    Line,
}

struct Lexer<'a> {
    program: &'a mut Program,
    bytes: &'a [u8],
    pos: usize,
    line: u16,
    /// Numbers lex as line references while set; commas keep it alive.
    linenum_ctx: bool,
    /// The next token starts a statement (`*` commands allowed here).
    stmt_start: bool,
}

impl<'a> Lexer<'a> {
    fn new(program: &'a mut Program, text: &'a str, line: u16) -> Lexer<'a> {
        Lexer {
            program,
            bytes: text.as_bytes(),
            pos: 0,
            line,
            linenum_ctx: false,
            stmt_start: true,
        }
    }

    fn error(&self, what: &str) -> Error {
        Error::Program(format!("line {}: {}", self.line, what))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    fn rest(&self) -> &'a str {
        // The lexer only ever advances on ASCII boundaries.
        core::str::from_utf8(&self.bytes[self.pos..]).unwrap_or("")
    }

    fn emit(&mut self, token: Token) {
        self.stmt_start = matches!(
            token,
            Token::Colon | Token::Then | Token::Else | Token::Repeat | Token::Otherwise
        );
        if !matches!(token, Token::Comma) {
            self.linenum_ctx = matches!(token, Token::Goto | Token::Gosub | Token::Restore)
                || (self.linenum_ctx && matches!(token, Token::LineRef(_)))
                || matches!(token, Token::Then | Token::Else);
        }
        self.program.code.push(token);
    }

    fn run(&mut self) -> Result<(), Error> {
        loop {
            self.skip_spaces();
            let byte = match self.peek() {
                Some(byte) => byte,
                None => return Ok(()),
            };
            match byte {
                b'*' if self.stmt_start => {
                    self.pos += 1;
                    let text = self.rest().trim().to_string();
                    self.pos = self.bytes.len();
                    let id = self.program.intern(&text);
                    self.emit(Token::Oscli);
                    self.emit(Token::StrConst(id));
                }
                b'"' => self.string_literal()?,
                b'0'..=b'9' | b'.' => self.number()?,
                b'&' => {
                    self.pos += 1;
                    self.hex_literal()?;
                }
                b'%' => {
                    self.pos += 1;
                    self.binary_literal()?;
                }
                b'A'..=b'Z' => {
                    if !self.keyword()? {
                        self.identifier()?;
                    }
                }
                b'a'..=b'z' | b'_' | b'`' | b'@' => self.identifier()?,
                _ => self.operator()?,
            }
        }
    }

    fn string_literal(&mut self) -> Result<(), Error> {
        debug_assert_eq!(self.peek(), Some(b'"'));
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    if self.peek() == Some(b'"') {
                        text.push('"');
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                Some(byte) => {
                    text.push(byte as char);
                    self.pos += 1;
                }
                None => return Err(self.error("missing \"")),
            }
        }
        let id = self.program.intern(&text);
        self.emit(Token::StrConst(id));
        Ok(())
    }

    fn number(&mut self) -> Result<(), Error> {
        let start = self.pos;
        while self.peek().is_some_and(|byte| byte.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            while self.peek().is_some_and(|byte| byte.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if self.peek() == Some(b'E') {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if self.peek().is_some_and(|byte| byte.is_ascii_digit()) {
                is_float = true;
                while self.peek().is_some_and(|byte| byte.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else {
                self.pos = mark;
            }
        }
        let text = core::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.error("bad number"))?;
            self.emit(Token::FloatConst(value));
        } else {
            match text.parse::<i64>() {
                Ok(value) if self.linenum_ctx && (0..=65279).contains(&value) => {
                    self.emit(Token::LineRef(value as u16));
                }
                Ok(value) => self.emit(Token::IntConst(value)),
                Err(_) => {
                    let value: f64 = text.parse().map_err(|_| self.error("bad number"))?;
                    self.emit(Token::FloatConst(value));
                }
            }
        }
        Ok(())
    }

    fn hex_literal(&mut self) -> Result<(), Error> {
        let start = self.pos;
        while self.peek().is_some_and(|byte| byte.is_ascii_hexdigit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("bad HEX"));
        }
        let text = core::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
        let bits = u64::from_str_radix(text, 16).map_err(|_| self.error("bad HEX"))?;
        // Up to eight digits keep the classic 32-bit wrap, &FFFFFFFF = -1.
        let value = if self.pos - start <= 8 {
            bits as u32 as i32 as i64
        } else {
            bits as i64
        };
        self.emit(Token::IntConst(value));
        Ok(())
    }

    fn binary_literal(&mut self) -> Result<(), Error> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0') | Some(b'1')) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("bad binary constant"));
        }
        let text = core::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
        let bits = u64::from_str_radix(text, 2).map_err(|_| self.error("bad binary constant"))?;
        let value = if self.pos - start <= 32 {
            bits as u32 as i32 as i64
        } else {
            bits as i64
        };
        self.emit(Token::IntConst(value));
        Ok(())
    }

    fn keyword(&mut self) -> Result<bool, Error> {
        let rest = self.rest();
        for (spelling, kind) in KEYWORDS {
            if !rest.starts_with(spelling) {
                continue;
            }
            self.pos += spelling.len();
            match kind {
                Kw::Plain(token) => self.emit(token.clone()),
                Kw::Func(function) => self.emit(Token::Func(*function)),
                Kw::FuncParen(function) => {
                    self.emit(Token::Func(*function));
                    self.emit(Token::LParen);
                }
                Kw::Goto(token) => self.emit(token.clone()),
                Kw::LineCtx(token) => self.emit(token.clone()),
                Kw::Restore => self.emit(Token::Restore),
                Kw::Rem => {
                    self.pos = self.bytes.len();
                }
                Kw::Data => {
                    if self.stmt_start {
                        self.data_items();
                    } else {
                        self.emit(Token::DataKeyword);
                    }
                }
                Kw::Rnd => self.emit(Token::Func(Function::Rnd)),
                Kw::Proc => {
                    let name = self.subprogram_name()?;
                    let id = self.program.intern(&name);
                    self.emit(Token::ProcUnres(id));
                }
                Kw::Fn => {
                    let name = self.subprogram_name()?;
                    let id = self.program.intern(&name);
                    self.emit(Token::FnUnres(id));
                }
                Kw::Input => {
                    self.skip_spaces();
                    if self.rest().starts_with("LINE") {
                        self.pos += 4;
                        self.emit(Token::InputLine);
                    } else {
                        self.emit(Token::Input);
                    }
                }
                Kw::Line => {
                    let mark = self.pos;
                    self.skip_spaces();
                    if self.rest().starts_with("INPUT") {
                        self.pos += 5;
                        self.emit(Token::InputLine);
                    } else {
                        // Not the `LINE INPUT` spelling: treat as a name.
                        self.pos = mark - spelling.len();
                        return Ok(false);
                    }
                }
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Captures the raw `DATA` item fields of the rest of the line.
    fn data_items(&mut self) {
        let rest = self.rest();
        self.pos = self.bytes.len();
        let mut items: Vec<alloc::boxed::Box<str>> = Vec::new();
        let mut field = String::new();
        let mut quoted = false;
        let mut chars = rest.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '"' => {
                    quoted = !quoted;
                    field.push('"');
                }
                ',' if !quoted => {
                    items.push(field.trim_start().into());
                    field.clear();
                }
                _ => field.push(ch),
            }
        }
        items.push(field.trim_start().into());
        self.program.data.push(DataBlock {
            line: self.line,
            items,
        });
        let id = crate::token::DataId((self.program.data.len() - 1) as u32);
        self.emit(Token::Data(id));
    }

    fn subprogram_name(&mut self) -> Result<String, Error> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|byte| byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'`')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("missing PROC/FN name"));
        }
        if matches!(self.peek(), Some(b'$') | Some(b'%')) {
            self.pos += 1;
        }
        Ok(core::str::from_utf8(&self.bytes[start..self.pos])
            .unwrap_or("")
            .into())
    }

    fn identifier(&mut self) -> Result<(), Error> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|byte| byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'`' || byte == b'@')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("unexpected character"));
        }
        // Type suffix.
        if self.peek() == Some(b'%') {
            self.pos += 1;
            if self.peek() == Some(b'%') {
                self.pos += 1;
            }
        } else if matches!(self.peek(), Some(b'&') | Some(b'$')) {
            self.pos += 1;
        }
        // A trailing `(` or `[` folds into the name: this is an array.
        let is_array = matches!(self.peek(), Some(b'(') | Some(b'['));
        if is_array {
            self.pos += 1;
        }
        let text = core::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("");
        let name = crate::symbols::normalize(text);
        if !is_array {
            if let Some(slot) = static_slot(&name) {
                self.emit(Token::Static(slot));
                return Ok(());
            }
        }
        let id = self.program.intern(&name);
        self.emit(Token::Var(id));
        Ok(())
    }

    fn operator(&mut self) -> Result<(), Error> {
        let rest = self.rest();
        let (len, token) = if rest.starts_with(">>>") {
            (3, Token::ShrU)
        } else if rest.starts_with("<=") {
            (2, Token::Le)
        } else if rest.starts_with(">=") {
            (2, Token::Ge)
        } else if rest.starts_with("<>") {
            (2, Token::Ne)
        } else if rest.starts_with("<<") {
            (2, Token::Shl)
        } else if rest.starts_with(">>") {
            (2, Token::Shr)
        } else if rest.starts_with("+=") {
            (2, Token::PlusEq)
        } else if rest.starts_with("-=") {
            (2, Token::MinusEq)
        } else {
            let token = match rest.as_bytes()[0] {
                b':' => Token::Colon,
                b'=' => Token::Eq,
                b'<' => Token::Lt,
                b'>' => Token::Gt,
                b'+' => Token::Plus,
                b'-' => Token::Minus,
                b'*' => Token::Star,
                b'/' => Token::SlashOp,
                b'^' => Token::Caret,
                b'(' => Token::LParen,
                b')' => Token::RParen,
                b']' => Token::RParen,
                b'[' => {
                    // Assembler text is not BASIC; leave the rest of the
                    // line alone and let the dispatcher reject the block.
                    self.pos = self.bytes.len();
                    self.emit(Token::Asm);
                    return Ok(());
                }
                b',' => Token::Comma,
                b';' => Token::Semicolon,
                b'\'' => Token::Apostrophe,
                b'~' => Token::Tilde,
                b'?' => Token::Query,
                b'!' => Token::Pling,
                b'$' => Token::Dollar,
                b'|' => Token::Bar,
                other => {
                    return Err(self.error(&format!("unexpected character '{}'", other as char)))
                }
            };
            (1, token)
        };
        self.pos += len;
        self.emit(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token::*;

    fn tokens(source: &str) -> Vec<Token> {
        let program = compile(source).unwrap();
        program.code
    }

    #[test]
    fn assignment_line() {
        assert_eq!(
            tokens("10 A%=1"),
            alloc::vec![Static(1), Eq, IntConst(1), Eol, Eof]
        );
    }

    #[test]
    fn keywords_are_greedy_and_case_sensitive() {
        let code = tokens("10 print%=1");
        assert!(matches!(code[0], Var(_)));
        let code = tokens("10 PRINT 1");
        assert_eq!(code[0], Print);
    }

    #[test]
    fn goto_numbers_are_line_refs() {
        assert_eq!(
            tokens("10 GOTO 100"),
            alloc::vec![Goto, LineRef(100), Eol, Eof]
        );
        // A number elsewhere stays a constant.
        assert_eq!(
            tokens("10 A%=100"),
            alloc::vec![Static(1), Eq, IntConst(100), Eol, Eof]
        );
    }

    #[test]
    fn on_goto_list_keeps_line_context() {
        let code = tokens("10 ON X% GOTO 100,200,300");
        assert!(code.contains(&LineRef(100)));
        assert!(code.contains(&LineRef(200)));
        assert!(code.contains(&LineRef(300)));
    }

    #[test]
    fn then_line_number_shortcut() {
        let code = tokens("10 IF A%=1 THEN 100");
        assert!(code.contains(&LineRef(100)));
    }

    #[test]
    fn string_literals_fold_doubled_quotes() {
        let program = compile("10 A$=\"he said \"\"hi\"\"\"").unwrap();
        let id = program
            .code
            .iter()
            .find_map(|token| match token {
                StrConst(id) => Some(*id),
                _ => None,
            })
            .unwrap();
        assert_eq!(program.name(id), "he said \"hi\"");
    }

    #[test]
    fn hex_and_binary_literals() {
        assert_eq!(
            tokens("10 A%=&FF"),
            alloc::vec![Static(1), Eq, IntConst(255), Eol, Eof]
        );
        assert_eq!(
            tokens("10 A%=&FFFFFFFF"),
            alloc::vec![Static(1), Eq, IntConst(-1), Eol, Eof]
        );
        assert_eq!(
            tokens("10 A%=%1010"),
            alloc::vec![Static(1), Eq, IntConst(10), Eol, Eof]
        );
    }

    #[test]
    fn array_names_fold_the_paren() {
        let program = compile("10 DIM a%(10)").unwrap();
        let name = program
            .code
            .iter()
            .find_map(|token| match token {
                Var(id) => Some(program.name(*id)),
                _ => None,
            })
            .unwrap();
        assert_eq!(name, "a%(");
        // Square-bracket spelling normalizes to the same name.
        let program = compile("10 x = a%[2]").unwrap();
        let name = program
            .code
            .iter()
            .find_map(|token| match token {
                Var(id) if program.name(*id).ends_with('(') => Some(program.name(*id)),
                _ => None,
            })
            .unwrap();
        assert_eq!(name, "a%(");
    }

    #[test]
    fn data_items_stay_raw() {
        let program = compile("10 DATA 5, hello world, \"a,b\"").unwrap();
        assert_eq!(program.data.len(), 1);
        let items = &program.data[0].items;
        assert_eq!(&*items[0], "5");
        assert_eq!(&*items[1], "hello world");
        assert_eq!(&*items[2], "\"a,b\"");
    }

    #[test]
    fn star_command_is_oscli() {
        let program = compile("10 *CAT").unwrap();
        assert_eq!(program.code[0], Oscli);
        assert!(matches!(program.code[1], StrConst(_)));
    }

    #[test]
    fn proc_and_fn_call_sites() {
        let program = compile("10 PROCinit(1)\n20 X=FNdouble(2)").unwrap();
        assert!(program
            .code
            .iter()
            .any(|token| matches!(token, ProcUnres(_))));
        assert!(program.code.iter().any(|token| matches!(token, FnUnres(_))));
    }

    #[test]
    fn rem_drops_the_rest() {
        assert_eq!(tokens("10 REM anything at all"), alloc::vec![Eol, Eof]);
    }

    #[test]
    fn unnumbered_lines_are_auto_numbered() {
        let program = compile("PRINT 1\nPRINT 2").unwrap();
        assert_eq!(program.lines[0].number, 10);
        assert_eq!(program.lines[1].number, 20);
    }

    #[test]
    fn assembler_blocks_lex_to_asm() {
        let code = tokens("10 [ MOV r0, #0");
        assert_eq!(code[0], Asm);
    }
}
