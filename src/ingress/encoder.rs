// Line protocol encoder.
//
// Layout of an emitted line:
//   table[,symbol=value...][ column=value[,column=value...]] timestamp_ns\n
// Symbols always precede columns. The designated timestamp is in nanoseconds.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::ingress::message::{Message, Value};

/// Characters QuestDB refuses in table names.
const TABLE_FORBIDDEN: &[char] = &[
    '?', ',', '\'', '"', '\\', '/', ':', '(', ')', '+', '*', '%', '~', '\u{feff}',
];

/// Column names are stricter than table names.
const COLUMN_FORBIDDEN: &[char] = &['.', '-'];

/// Escaped with a backslash wherever a value is written without quotes.
const UNQUOTED_SPECIAL: &[char] = &[' ', ',', '=', '\n', '\r', '"', '\\'];

/// Escaped inside double-quoted string column values.
const QUOTED_SPECIAL: &[char] = &['\n', '\r', '"', '\\'];

/// Encode a message, resolving a missing timestamp to the current time.
pub fn encode(msg: &Message) -> Result<String> {
    encode_with_now(msg, Utc::now)
}

/// Encode a message, calling `now` only if the message carries no timestamp.
pub fn encode_with_now(msg: &Message, now: impl FnOnce() -> DateTime<Utc>) -> Result<String> {
    validate_table_name(&msg.table_name)?;
    if msg.symbols.is_empty() && msg.columns.is_empty() {
        return Err(Error::Encoding(format!(
            "row for table {} has no symbols and no columns",
            msg.table_name
        )));
    }

    let mut line = String::with_capacity(64);
    write_escaped(&mut line, &msg.table_name, UNQUOTED_SPECIAL);

    for (name, value) in &msg.symbols {
        validate_column_name(name)?;
        if msg.columns.contains_key(name) {
            return Err(Error::Encoding(format!(
                "{} is used both as a symbol and as a column",
                name
            )));
        }
        line.push(',');
        write_escaped(&mut line, name, UNQUOTED_SPECIAL);
        line.push('=');
        write_escaped(&mut line, value, UNQUOTED_SPECIAL);
    }

    let mut sep = ' ';
    for (name, value) in &msg.columns {
        validate_column_name(name)?;
        line.push(sep);
        sep = ',';
        write_escaped(&mut line, name, UNQUOTED_SPECIAL);
        line.push('=');
        write_value(&mut line, value);
    }

    let at = msg.at.unwrap_or_else(now);
    let nanos = at.timestamp_nanos_opt().ok_or_else(|| {
        Error::Encoding(format!("timestamp {} is out of nanosecond range", at))
    })?;
    let _ = write!(line, " {}", nanos);
    line.push('\n');
    Ok(line)
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Integer(i) => {
            let _ = write!(out, "{}i", i);
        }
        Value::Float(f) => {
            if f.is_nan() {
                out.push_str("NaN");
            } else if f.is_infinite() {
                out.push_str(if *f > 0.0 { "Infinity" } else { "-Infinity" });
            } else {
                let _ = write!(out, "{}", f);
            }
        }
        Value::Boolean(b) => out.push(if *b { 't' } else { 'f' }),
        Value::String(s) => {
            out.push('"');
            write_escaped(out, s, QUOTED_SPECIAL);
            out.push('"');
        }
        Value::Timestamp(ts) => {
            let _ = write!(out, "{}t", ts.timestamp_micros());
        }
    }
}

fn write_escaped(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Encoding("table name must not be empty".into()));
    }
    if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
        return Err(Error::Encoding(format!(
            "table name {:?} has a misplaced '.'",
            name
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_control() || TABLE_FORBIDDEN.contains(c))
    {
        return Err(Error::Encoding(format!(
            "table name {:?} contains illegal character {:?}",
            name, c
        )));
    }
    Ok(())
}

fn is_column_char(c: char) -> bool {
    !(c.is_control() || TABLE_FORBIDDEN.contains(&c) || COLUMN_FORBIDDEN.contains(&c))
}

/// Replace characters that are not allowed in column names with `_`.
pub(crate) fn sanitize_column_name(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    name.chars()
        .map(|c| if is_column_char(c) { c } else { '_' })
        .collect()
}

fn validate_column_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Encoding("column name must not be empty".into()));
    }
    if let Some(c) = name.chars().find(|c| !is_column_char(*c)) {
        return Err(Error::Encoding(format!(
            "column name {:?} contains illegal character {:?}",
            name, c
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    /// Minimal line protocol reader, enough to check what the encoder wrote.
    #[derive(Debug, PartialEq)]
    struct Parsed {
        table: String,
        symbols: BTreeMap<String, String>,
        columns: BTreeMap<String, Value>,
        nanos: i64,
    }

    fn split_top(s: &str, delim: char) -> Vec<String> {
        let mut parts = Vec::new();
        let mut cur = String::new();
        let mut quoted = false;
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    cur.push(c);
                    if let Some(n) = chars.next() {
                        cur.push(n);
                    }
                }
                '"' => {
                    quoted = !quoted;
                    cur.push(c);
                }
                c if c == delim && !quoted => parts.push(std::mem::take(&mut cur)),
                c => cur.push(c),
            }
        }
        parts.push(cur);
        parts
    }

    fn unescape(s: &str) -> String {
        let mut out = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                if let Some(n) = chars.next() {
                    out.push(n);
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    fn pair(s: &str) -> (String, String) {
        let mut kv = split_top(s, '=');
        let key = kv.remove(0);
        (unescape(&key), kv.join("="))
    }

    fn parse_value(raw: &str) -> Value {
        if let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            return Value::String(unescape(inner));
        }
        match raw {
            "t" => return Value::Boolean(true),
            "f" => return Value::Boolean(false),
            "NaN" => return Value::Float(f64::NAN),
            "Infinity" => return Value::Float(f64::INFINITY),
            "-Infinity" => return Value::Float(f64::NEG_INFINITY),
            _ => {}
        }
        if let Some(i) = raw.strip_suffix('i') {
            return Value::Integer(i.parse().unwrap());
        }
        if let Some(us) = raw.strip_suffix('t') {
            return Value::Timestamp(Utc.timestamp_micros(us.parse().unwrap()).unwrap());
        }
        Value::Float(raw.parse().unwrap())
    }

    fn parse_line(line: &str) -> Parsed {
        let line = line.strip_suffix('\n').expect("line must end in newline");
        let parts = split_top(line, ' ');
        let (head, fields, ts) = match parts.as_slice() {
            [head, fields, ts] => (head, Some(fields), ts),
            [head, ts] => (head, None, ts),
            other => panic!("unexpected line shape: {:?}", other),
        };

        let mut head = split_top(head, ',');
        let table = unescape(&head.remove(0));
        let symbols = head
            .iter()
            .map(|s| {
                let (k, v) = pair(s);
                (k, unescape(&v))
            })
            .collect();
        let columns = fields
            .map(|f| {
                split_top(f, ',')
                    .iter()
                    .map(|s| {
                        let (k, v) = pair(s);
                        (k, parse_value(&v))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Parsed {
            table,
            symbols,
            columns,
            nanos: ts.parse().unwrap(),
        }
    }

    fn fixed_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 8, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn encodes_symbols_before_columns() {
        let msg = Message::new("test_table")
            .column("number", 15i64)
            .symbol("some_symbol", "AAPL")
            .column("tf", true)
            .at(fixed_ts());
        let line = encode(&msg).unwrap();
        assert_eq!(
            line,
            "test_table,some_symbol=AAPL number=15i,tf=t 1692014400000000000\n"
        );
    }

    #[test]
    fn symbol_only_row_has_no_column_section() {
        let msg = Message::new("t").symbol("a", "b").at(fixed_ts());
        assert_eq!(encode(&msg).unwrap(), "t,a=b 1692014400000000000\n");
    }

    #[test]
    fn escapes_reserved_characters() {
        let msg = Message::new("my table")
            .symbol("k ey", "v,a=l\\ue")
            .column("s", "say \"hi\"\nbye")
            .at(fixed_ts());
        let line = encode(&msg).unwrap();
        assert_eq!(
            line,
            "my\\ table,k\\ ey=v\\,a\\=l\\\\ue s=\"say \\\"hi\\\"\\\nbye\" 1692014400000000000\n"
        );
    }

    #[test]
    fn escapes_quotes_in_symbol_values() {
        let msg = Message::new("t")
            .symbol("s", "\"a\"b c")
            .column("x", 1i64)
            .at(fixed_ts());
        assert_eq!(
            encode(&msg).unwrap(),
            "t,s=\\\"a\\\"b\\ c x=1i 1692014400000000000\n"
        );
    }

    #[test]
    fn renders_every_value_variant() {
        let msg = Message::new("t")
            .column("i", -7i64)
            .column("f", 0.25)
            .column("whole", 2.0)
            .column("nan", f64::NAN)
            .column("inf", f64::NEG_INFINITY)
            .column("b", false)
            .column("ts", Utc.timestamp_micros(1_500).unwrap())
            .at(fixed_ts());
        let line = encode(&msg).unwrap();
        assert_eq!(
            line,
            "t b=f,f=0.25,i=-7i,inf=-Infinity,nan=NaN,ts=1500t,whole=2 1692014400000000000\n"
        );
    }

    #[test]
    fn round_trips_through_a_parser() {
        let msg = Message::new("weather obs")
            .symbol("station", "KSEA, north=1")
            .symbol("region", "us\\west")
            .symbol("desk", "\"quoted x")
            .symbol("trader", "a\"b c")
            .column("temp", 12.75)
            .column("count", 3i64)
            .column("note", "cloudy, \"wet\"\r\n")
            .column("ok", true)
            .column("seen", Utc.timestamp_micros(1_692_014_400_123_456).unwrap())
            .at(Utc.timestamp_nanos(1_692_014_400_123_456_789));

        let parsed = parse_line(&encode(&msg).unwrap());
        assert_eq!(parsed.table, msg.table_name);
        assert_eq!(parsed.symbols, msg.symbols);
        assert_eq!(parsed.columns, msg.columns);
        assert_eq!(parsed.nanos, 1_692_014_400_123_456_789);
    }

    #[test]
    fn missing_timestamp_is_resolved_at_encode_time() {
        let msg = Message::new("t").column("x", 1i64);
        let before = Utc::now().timestamp_nanos_opt().unwrap();
        let parsed = parse_line(&encode(&msg).unwrap());
        let after = Utc::now().timestamp_nanos_opt().unwrap();
        assert!(parsed.nanos >= before && parsed.nanos <= after);

        let called = std::cell::Cell::new(false);
        let stamped = msg.clone().at(fixed_ts());
        encode_with_now(&stamped, || {
            called.set(true);
            Utc::now()
        })
        .unwrap();
        assert!(!called.get());
    }

    #[test]
    fn rejects_empty_table_name() {
        let err = encode(&Message::new("").column("x", 1i64)).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }

    #[test]
    fn rejects_illegal_names() {
        for table in ["a/b", "a,b", ".hidden", "a..b", "line\nbreak"] {
            let err = encode(&Message::new(table).column("x", 1i64)).unwrap_err();
            assert!(matches!(err, Error::Encoding(_)), "{:?} accepted", table);
        }
        for column in ["a.b", "a-b", "a,b", "", "tab\tbed"] {
            let err = encode(&Message::new("t").column(column, 1i64)).unwrap_err();
            assert!(matches!(err, Error::Encoding(_)), "{:?} accepted", column);
        }
    }

    #[test]
    fn sanitized_names_always_validate() {
        for name in ["user.id", "a-b", "", "x\ny", "ok_name"] {
            let clean = sanitize_column_name(name);
            assert!(validate_column_name(&clean).is_ok(), "{:?} -> {:?}", name, clean);
        }
        assert_eq!(sanitize_column_name("user.id"), "user_id");
    }

    #[test]
    fn rejects_overlapping_symbol_and_column() {
        let msg = Message::new("t").symbol("x", "a").column("x", 1i64);
        assert!(matches!(encode(&msg), Err(Error::Encoding(_))));
    }

    #[test]
    fn rejects_empty_row() {
        assert!(matches!(encode(&Message::new("t")), Err(Error::Encoding(_))));
    }
}
