//! Composite (`{0:N0}`) and date/time format strings in the invariant
//! en-US style templates are written against.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::eval::value::Value;

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const DAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Formats `args` into `format`, where placeholders are
/// `{index[,alignment][:formatString]}` and `{{`/`}}` are literal braces.
pub fn composite(format: &str, args: &[Value]) -> Result<String, String> {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut item = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => item.push(c),
                        None => return Err("unterminated format item".to_string()),
                    }
                }
                out.push_str(&format_item(&item, args)?);
            }
            '}' => return Err("unexpected '}' in format string".to_string()),
            c => out.push(c),
        }
    }
    Ok(out)
}

fn format_item(item: &str, args: &[Value]) -> Result<String, String> {
    let (head, spec) = match item.split_once(':') {
        Some((head, spec)) => (head, Some(spec)),
        None => (item, None),
    };
    let (index, alignment) = match head.split_once(',') {
        Some((index, alignment)) => (index, Some(alignment)),
        None => (head, None),
    };
    let index: usize = index
        .trim()
        .parse()
        .map_err(|_| format!("invalid format item '{{{}}}'", item))?;
    let value = args
        .get(index)
        .ok_or_else(|| format!("index {} is out of range for {} argument(s)", index, args.len()))?;

    let text = match (value, spec) {
        (Value::Int(n), Some(spec)) => format_number(Number::Int(*n), spec)?,
        (Value::Float(f), Some(spec)) => format_number(Number::Float(*f), spec)?,
        (value, _) => value.to_display_string(),
    };

    let Some(alignment) = alignment else {
        return Ok(text);
    };
    let width: i64 = alignment
        .trim()
        .parse()
        .ok()
        .filter(|w: &i64| w.unsigned_abs() < MAX_WIDTH as u64)
        .ok_or_else(|| format!("invalid alignment '{}'", alignment))?;
    let pad = (width.unsigned_abs() as usize).saturating_sub(text.chars().count());
    Ok(if width < 0 {
        format!("{}{}", text, " ".repeat(pad))
    } else {
        format!("{}{}", " ".repeat(pad), text)
    })
}

/// Upper bound for alignments and precisions.
const MAX_WIDTH: usize = 1_000_000;

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn fixed(self, precision: usize) -> String {
        match self {
            Number::Int(n) => fixed_integer(i128::from(n), precision),
            Number::Float(f) => format!("{:.*}", precision, f),
        }
    }

    fn percent(self, precision: usize) -> String {
        match self {
            Number::Int(n) => format!("{} %", fixed_integer(i128::from(n) * 100, precision)),
            Number::Float(f) => format!("{:.*} %", precision, f * 100.0),
        }
    }
}

fn fixed_integer(n: i128, precision: usize) -> String {
    if precision == 0 {
        n.to_string()
    } else {
        format!("{}.{}", n, "0".repeat(precision))
    }
}

/// Applies a standard numeric format: `N`, `D`, `X`, `F`, `P` or `G`,
/// each with an optional precision.
fn format_number(value: Number, spec: &str) -> Result<String, String> {
    let mut chars = spec.chars();
    let Some(kind) = chars.next() else {
        return Ok(plain_number(value));
    };
    let precision: Option<usize> = match chars.as_str() {
        "" => None,
        digits => Some(
            digits
                .parse()
                .ok()
                .filter(|p| *p < MAX_WIDTH)
                .ok_or_else(|| format!("invalid numeric format '{}'", spec))?,
        ),
    };
    Ok(match (kind, value) {
        ('N' | 'n', _) => group_thousands(&value.fixed(precision.unwrap_or(2))),
        ('F' | 'f', _) => value.fixed(precision.unwrap_or(2)),
        ('P' | 'p', _) => value.percent(precision.unwrap_or(2)),
        ('D' | 'd', Number::Int(n)) => {
            let padded = format!("{:0>width$}", n.unsigned_abs(), width = precision.unwrap_or(0));
            if n < 0 {
                format!("-{}", padded)
            } else {
                padded
            }
        }
        ('X', Number::Int(n)) => format!("{:0>width$X}", n, width = precision.unwrap_or(0)),
        ('x', Number::Int(n)) => format!("{:0>width$x}", n, width = precision.unwrap_or(0)),
        ('G' | 'g', _) => plain_number(value),
        _ => return Err(format!("unsupported numeric format '{}'", spec)),
    })
}

fn plain_number(value: Number) -> String {
    match value {
        Number::Int(n) => n.to_string(),
        Number::Float(f) => f.to_string(),
    }
}

fn group_thousands(number: &str) -> String {
    let (sign, rest) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (whole, fraction) = match rest.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (rest, None),
    };
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    match fraction {
        Some(fraction) => format!("{}{}.{}", sign, grouped, fraction),
        None => format!("{}{}", sign, grouped),
    }
}

/// Expands a single-character standard date format into its custom pattern.
fn standard_date_pattern(format: &str) -> Option<&'static str> {
    Some(match format {
        "d" => "M/d/yyyy",
        "D" => "dddd, MMMM d, yyyy",
        "f" => "dddd, MMMM d, yyyy h:mm tt",
        "F" => "dddd, MMMM d, yyyy h:mm:ss tt",
        "g" => "M/d/yyyy h:mm tt",
        "G" => "M/d/yyyy h:mm:ss tt",
        "m" | "M" => "MMMM d",
        "o" | "O" => "yyyy'-'MM'-'dd'T'HH':'mm':'ss'.'fffffffK",
        "r" | "R" => "ddd, dd MMM yyyy HH':'mm':'ss 'GMT'",
        "s" => "yyyy'-'MM'-'dd'T'HH':'mm':'ss",
        "t" => "h:mm tt",
        "T" => "h:mm:ss tt",
        "u" => "yyyy'-'MM'-'dd HH':'mm':'ss'Z'",
        "y" | "Y" => "MMMM yyyy",
        _ => return None,
    })
}

/// Formats a UTC timestamp with a standard or custom date format string.
pub fn date_time(value: &DateTime<Utc>, format: &str) -> Result<String, String> {
    let pattern = if format.chars().count() == 1 {
        standard_date_pattern(format)
            .ok_or_else(|| format!("unsupported date format '{}'", format))?
    } else {
        format
    };

    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let run = chars[i..].iter().take_while(|&&x| x == c).count();
        match c {
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&x| x == c)
                    .map(|p| i + 1 + p)
                    .ok_or_else(|| format!("unterminated quote in date format '{}'", format))?;
                out.extend(&chars[i + 1..end]);
                i = end + 1;
                continue;
            }
            '\\' => {
                if let Some(&next) = chars.get(i + 1) {
                    out.push(next);
                }
                i += 2;
                continue;
            }
            'y' => out.push_str(&match run {
                1 => (value.year() % 100).to_string(),
                2 => format!("{:02}", value.year() % 100),
                n => format!("{:0width$}", value.year(), width = n),
            }),
            'M' => out.push_str(&match run {
                1 => value.month().to_string(),
                2 => format!("{:02}", value.month()),
                3 => MONTHS[value.month0() as usize][..3].to_string(),
                _ => MONTHS[value.month0() as usize].to_string(),
            }),
            'd' => out.push_str(&match run {
                1 => value.day().to_string(),
                2 => format!("{:02}", value.day()),
                3 => DAYS[value.weekday().num_days_from_monday() as usize][..3].to_string(),
                _ => DAYS[value.weekday().num_days_from_monday() as usize].to_string(),
            }),
            'H' => out.push_str(&two_digit(value.hour(), run)),
            'h' => out.push_str(&two_digit((value.hour() + 11) % 12 + 1, run)),
            'm' => out.push_str(&two_digit(value.minute(), run)),
            's' => out.push_str(&two_digit(value.second(), run)),
            'f' | 'F' => {
                let digits = format!("{:09}", value.nanosecond());
                let mut fraction = digits[..run.min(7)].to_string();
                if c == 'F' {
                    fraction = fraction.trim_end_matches('0').to_string();
                }
                out.push_str(&fraction);
            }
            't' => {
                let designator = if value.hour() < 12 { "AM" } else { "PM" };
                out.push_str(if run == 1 { &designator[..1] } else { designator });
            }
            'K' => out.push('Z'),
            'z' => out.push_str(match run {
                1 => "+0",
                2 => "+00",
                _ => "+00:00",
            }),
            c => {
                for _ in 0..run {
                    out.push(c);
                }
            }
        }
        i += run;
    }
    Ok(out)
}

fn two_digit(n: u32, run: usize) -> String {
    if run == 1 {
        n.to_string()
    } else {
        format!("{:02}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn sample() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 4, 7, 14, 53, 14).unwrap()
    }

    #[test]
    fn test_composite() {
        let args = [
            Value::string("Hello"),
            Value::string("User"),
            Value::Int(8_175_133),
        ];
        assert_eq!(
            composite("{0}, {1}. Formatted number: {2:N0}", &args).unwrap(),
            "Hello, User. Formatted number: 8,175,133"
        );
    }

    #[test]
    fn test_composite_escapes_and_alignment() {
        let args = [Value::Int(42), Value::Bool(true)];
        assert_eq!(composite("{{{0}}}", &args).unwrap(), "{42}");
        assert_eq!(composite("[{0,5}|{1,-6}]", &args).unwrap(), "[   42|True  ]");
        assert_eq!(composite("{0:D5} {0:X} {0:F1}", &args).unwrap(), "00042 2A 42.0");
    }

    #[test]
    fn test_composite_errors() {
        assert!(composite("{1}", &[Value::Int(1)]).is_err());
        assert!(composite("{0", &[Value::Int(1)]).is_err());
        assert!(composite("{a}", &[Value::Int(1)]).is_err());
        assert!(composite("{0,99999999999}", &[Value::Int(1)]).is_err());
        assert!(composite("{0:D99999999999}", &[Value::Int(1)]).is_err());
    }

    #[test]
    fn test_composite_integers_keep_precision() {
        let args = [Value::Int(i64::MIN), Value::Int(9_007_199_254_740_993)];
        assert_eq!(
            composite("{0:D5}|{0:G}", &args).unwrap(),
            "-9223372036854775808|-9223372036854775808"
        );
        assert_eq!(
            composite("{1:N0}|{1:F2}|{1:D}", &args).unwrap(),
            "9,007,199,254,740,993|9007199254740993.00|9007199254740993"
        );
        assert_eq!(
            composite("{0:P0}", &args).unwrap(),
            "-922337203685477580800 %"
        );
        assert_eq!(composite("{0:N1}", &[Value::Int(-1234)]).unwrap(), "-1,234.0");
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands("-1234567.50"), "-1,234,567.50");
        assert_eq!(group_thousands("999"), "999");
    }

    #[test]
    fn test_date_time_custom() {
        assert_eq!(
            date_time(&sample(), "yyyyMMddTHHmmssZ").unwrap(),
            "20200407T145314Z"
        );
        assert_eq!(date_time(&sample(), "M d").unwrap(), "4 7");
        assert_eq!(
            date_time(&sample(), "dddd, MMM dd 'at' h:mm tt").unwrap(),
            "Tuesday, Apr 07 at 2:53 PM"
        );
    }

    #[test]
    fn test_date_time_standard() {
        assert_eq!(date_time(&sample(), "d").unwrap(), "4/7/2020");
        assert_eq!(date_time(&sample(), "u").unwrap(), "2020-04-07 14:53:14Z");
        assert_eq!(date_time(&sample(), "s").unwrap(), "2020-04-07T14:53:14");
        assert_eq!(
            date_time(&sample(), "o").unwrap(),
            "2020-04-07T14:53:14.0000000Z"
        );
        assert!(date_time(&sample(), "q").is_err());
    }
}
