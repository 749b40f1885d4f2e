//! Lexer for the Sorrel language.

use logos::Logos;

use crate::diagnostics::{ParseDiagnostic, Position};

/// Parsed payload of a money literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoneySpec {
    pub amount: i64,
    pub currency: String,
    pub scale: u8,
}

/// Parsed payload of a duration literal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationSpec {
    pub months: i32,
    pub days: i64,
    pub secs: i64,
}

/// Number of minor units per major unit for a currency code
pub fn currency_scale(code: &str) -> u8 {
    match code {
        "JPY" | "KRW" | "VND" => 0,
        _ => 2,
    }
}

fn parse_money(sym_or_code: &str, amount: &str) -> Option<MoneySpec> {
    let currency = match sym_or_code {
        "$" => "USD",
        "£" => "GBP",
        "€" => "EUR",
        code => code,
    }
    .to_string();
    let scale = currency_scale(&currency);

    let (whole, frac) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if frac.len() > scale as usize {
        return None; // more precision than the currency carries
    }
    let mut minor: i64 = whole.parse::<i64>().ok()?;
    for _ in 0..scale {
        minor = minor.checked_mul(10)?;
    }
    if !frac.is_empty() {
        let mut frac_val: i64 = frac.parse::<i64>().ok()?;
        for _ in 0..(scale as usize - frac.len()) {
            frac_val *= 10;
        }
        minor = minor.checked_add(frac_val)?;
    }
    Some(MoneySpec {
        amount: minor,
        currency,
        scale,
    })
}

fn lex_money(slice: &str) -> Option<MoneySpec> {
    if let Some(rest) = slice.strip_prefix('$') {
        parse_money("$", rest)
    } else if let Some(rest) = slice.strip_prefix('£') {
        parse_money("£", rest)
    } else if let Some(rest) = slice.strip_prefix('€') {
        parse_money("€", rest)
    } else {
        let (code, amount) = slice.split_once('#')?;
        parse_money(code, amount)
    }
}

fn lex_duration(slice: &str) -> Option<DurationSpec> {
    let unit_start = slice.find(|c: char| c.is_ascii_alphabetic())?;
    let (num, unit) = slice.split_at(unit_start);
    let n: i64 = num.parse().ok()?;
    let mut spec = DurationSpec {
        months: 0,
        days: 0,
        secs: 0,
    };
    match unit {
        "s" => spec.secs = n,
        "m" => spec.secs = n * 60,
        "h" => spec.secs = n * 3600,
        "d" => spec.days = n,
        "w" => spec.days = n * 7,
        "mo" => spec.months = i32::try_from(n).ok()?,
        "y" => spec.months = i32::try_from(n * 12).ok()?,
        _ => return None,
    }
    Some(spec)
}

fn unescape(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn lex_regex(slice: &str) -> (String, String) {
    // slice is r/pattern/flags
    let body = &slice[2..];
    let close = body.rfind('/').unwrap_or(body.len());
    let pattern = body[..close].to_string();
    let flags = body[close + 1..].to_string();
    (pattern, flags)
}

/// Token types for Sorrel
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*[^/])*\*/")]
pub enum TokenKind {
    // Keywords
    #[token("let")]
    Let,
    #[token("export")]
    Export,
    #[token("fn")]
    Fn,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("try")]
    Try,
    #[token("import")]
    Import,
    #[token("null")]
    Null,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("is")]
    Is,
    #[token("not")]
    Not,
    #[token("stop")]
    Stop,
    #[token("skip")]
    Skip,

    // Literals (longest-match keeps these ahead of plain Int/Ident)
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    FloatLit(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok(), priority = 2)]
    IntLit(i64),

    #[regex(r"[0-9]+(s|m|h|d|w|mo|y)", |lex| lex_duration(lex.slice()), priority = 3)]
    DurationLit(DurationSpec),

    #[regex(r"\$[0-9]+(\.[0-9]+)?", |lex| lex_money(lex.slice()))]
    #[regex(r"£[0-9]+(\.[0-9]+)?", |lex| lex_money(lex.slice()))]
    #[regex(r"€[0-9]+(\.[0-9]+)?", |lex| lex_money(lex.slice()))]
    #[regex(r"[A-Z]{3}#[0-9]+(\.[0-9]+)?", |lex| lex_money(lex.slice()))]
    MoneyLit(MoneySpec),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    StrLit(String),

    #[regex(r"r/([^/\\\n]|\\.)*/[a-z]*", |lex| lex_regex(lex.slice()))]
    RegexLit((String, String)),

    // @-literals: datetimes, times, and paths share the @ sigil with
    // protected identifiers; longest match disambiguates.
    #[regex(
        r"@[0-9]{4}-[0-9]{1,2}-[0-9]{1,2}(T[0-9]{2}:[0-9]{2}(:[0-9]{2})?(Z|[+-][0-9]{2}:[0-9]{2})?)?",
        |lex| lex.slice()[1..].to_string()
    )]
    #[regex(r"@[0-9]{2}:[0-9]{2}(:[0-9]{2})?", |lex| lex.slice()[1..].to_string())]
    DatetimeLit(String),

    #[regex(r"@\.\.?/[A-Za-z0-9_\-./]+", |lex| lex.slice()[1..].to_string())]
    #[regex(r"@~/[A-Za-z0-9_\-./]+", |lex| lex.slice()[1..].to_string())]
    #[regex(r"@/[A-Za-z0-9_\-./]+", |lex| lex.slice()[1..].to_string())]
    #[regex(r"@std/[A-Za-z0-9_\-./]+", |lex| lex.slice()[1..].to_string())]
    PathLit(String),

    #[regex(r"https?://[A-Za-z0-9_\-.~:/?#\[\]%@!$&'*+,;=()]+", |lex| lex.slice().to_string())]
    UrlLit(String),

    // Identifiers: plain and protected (@env, @args, @params)
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    #[regex(r"@[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Operators
    #[token("++")]
    PlusPlus,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("==")]
    EqEq,
    #[token("!=")]
    BangEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("??")]
    QuestionQuestion,
    #[token("!")]
    Bang,
    #[token("=")]
    Eq,

    // Punctuation
    #[token("...")]
    Ellipsis,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token(";")]
    Semicolon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
}

/// A token with its source position
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Position,
}

/// Tokenize a source string, reporting lex errors as parse diagnostics.
pub fn tokenize(source: &str) -> Result<Vec<Token>, Vec<ParseDiagnostic>> {
    // Byte offset of each line start, for offset -> (line, col) mapping
    let mut line_starts = vec![0usize];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            line_starts.push(i + 1);
        }
    }
    let position_of = |offset: usize| -> Position {
        let line = match line_starts.binary_search(&offset) {
            Ok(n) => n + 1,
            Err(n) => n,
        };
        let col = source[line_starts[line - 1]..offset].chars().count() + 1;
        Position::new(line, col)
    };

    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut lexer = TokenKind::lexer(source);
    while let Some(result) = lexer.next() {
        let pos = position_of(lexer.span().start);
        match result {
            Ok(kind) => tokens.push(Token { kind, pos }),
            Err(()) => errors.push(ParseDiagnostic::new(
                "SYN-0001",
                format!("unrecognized token '{}'", lexer.slice()),
                pos,
            )),
        }
    }
    if errors.is_empty() {
        Ok(tokens)
    } else {
        Err(errors)
    }
}
