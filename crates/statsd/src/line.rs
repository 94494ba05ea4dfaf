#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Missing \":\" after metric name")]
    MissingName,
    #[error("Missing \"|\" in value group: \"{0}\"")]
    MissingSeparator(String),
    #[error("Invalid value: \"{0}\"")]
    InvalidValue(String),
}

/// Metric category as far as aggregation is concerned: counters are folded
/// into a running sum, everything else is forwarded verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Other,
}

/// Splits a datagram into lines. The terminating `\n` is not part of the
/// yielded slices; a missing final newline is tolerated.
pub fn split_lines(datagram: &[u8]) -> impl Iterator<Item = &[u8]> {
    datagram.split(|b| *b == b'\n').filter(|line| !line.is_empty())
}

/// One parsed line: the metric name (terminating `:` included) and its
/// `:`-separated value groups.
#[derive(Debug, Clone, Copy)]
pub struct Line<'a> {
    name: &'a [u8],
    rest: &'a [u8],
}

impl<'a> Line<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ParseError> {
        let colon = bytes
            .iter()
            .position(|b| *b == b':')
            .ok_or(ParseError::MissingName)?;
        Ok(Self {
            name: &bytes[..=colon],
            rest: &bytes[colon + 1..],
        })
    }

    /// Metric name including the terminating `:`.
    pub fn name(&self) -> &'a [u8] {
        self.name
    }

    pub fn groups(&self) -> Groups<'a> {
        Groups {
            rest: Some(self.rest),
        }
    }
}

/// Iterator over the value groups of a line. Each group is parsed on its
/// own so one malformed group does not discard its siblings.
#[derive(Debug)]
pub struct Groups<'a> {
    rest: Option<&'a [u8]>,
}

impl<'a> Iterator for Groups<'a> {
    type Item = Result<ValueGroup<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest?;
        let (group, next) = match rest.iter().position(|b| *b == b':') {
            Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
            None => (rest, None),
        };
        self.rest = next;
        Some(ValueGroup::parse(group))
    }
}

/// One `value|type[|@rate]` group.
#[derive(Debug, Clone, Copy)]
pub struct ValueGroup<'a> {
    bytes: &'a [u8],
    value: &'a [u8],
    rate: Option<&'a [u8]>,
    pub kind: MetricKind,
}

impl<'a> ValueGroup<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self, ParseError> {
        let bar = bytes
            .iter()
            .position(|b| *b == b'|')
            .ok_or_else(|| ParseError::MissingSeparator(lossy(bytes)))?;
        let value = &bytes[..bar];
        let rest = &bytes[bar + 1..];
        let (tag, trailer) = match rest.iter().position(|b| *b == b'|') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, &rest[rest.len()..]),
        };
        Ok(Self {
            bytes,
            value,
            rate: trailer.strip_prefix(b"|@"),
            kind: if tag == b"c" {
                MetricKind::Counter
            } else {
                MetricKind::Other
            },
        })
    }

    /// The whole group, separators excluded, as received on the wire.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Sampled counter increment: `value / rate`.
    ///
    /// A rate that is absent, non-numeric or not finite defaults to 1.0;
    /// the value itself must be a finite float.
    pub fn counter_increment(&self) -> Result<f64, ParseError> {
        let value = parse_finite(self.value)?;
        let rate = self
            .rate
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|rate| rate.is_finite())
            .unwrap_or(1.0);
        Ok(value / rate)
    }
}

fn parse_finite(bytes: &[u8]) -> Result<f64, ParseError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .ok_or_else(|| ParseError::InvalidValue(lossy(bytes)))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups<'a>(line: &Line<'a>) -> Vec<ValueGroup<'a>> {
        line.groups().map(|group| group.unwrap()).collect()
    }

    #[test]
    fn splits_lines_with_and_without_trailing_newline() {
        let lines: Vec<&[u8]> = split_lines(b"a:1|c\nb:2|ms\n").collect();
        assert_eq!(lines, vec![b"a:1|c".as_slice(), b"b:2|ms".as_slice()]);

        let lines: Vec<&[u8]> = split_lines(b"a:1|c\nb:2|ms").collect();
        assert_eq!(lines, vec![b"a:1|c".as_slice(), b"b:2|ms".as_slice()]);
    }

    #[test]
    fn parses_name_and_groups() {
        let line = Line::parse(b"gorets:1|c:2|ms").unwrap();
        assert_eq!(line.name(), b"gorets:");

        let groups = groups(&line);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].bytes(), b"1|c");
        assert_eq!(groups[0].kind, MetricKind::Counter);
        assert_eq!(groups[1].bytes(), b"2|ms");
        assert_eq!(groups[1].kind, MetricKind::Other);
    }

    #[test]
    fn rejects_line_without_name_separator() {
        assert_eq!(
            Line::parse(b"gorets|1").unwrap_err(),
            ParseError::MissingName
        );
    }

    #[test]
    fn rejects_group_without_separator() {
        let line = Line::parse(b"gorets:oops").unwrap();
        let error = line.groups().next().unwrap().unwrap_err();
        assert_eq!(error, ParseError::MissingSeparator("oops".into()));
    }

    #[test]
    fn counter_increment_applies_sample_rate() {
        let line = Line::parse(b"gorets:1|c|@0.25").unwrap();
        let group = line.groups().next().unwrap().unwrap();
        assert_eq!(group.counter_increment().unwrap(), 4.0);
    }

    #[test]
    fn malformed_rate_defaults_to_one() {
        for raw in [
            b"gorets:3|c|@fast".as_slice(),
            b"gorets:3|c|@".as_slice(),
            b"gorets:3|c|@0.5x".as_slice(),
        ] {
            let line = Line::parse(raw).unwrap();
            let group = line.groups().next().unwrap().unwrap();
            assert_eq!(group.counter_increment().unwrap(), 3.0);
        }
    }

    #[test]
    fn rejects_non_numeric_counter_value() {
        let line = Line::parse(b"gorets:abc|c").unwrap();
        let group = line.groups().next().unwrap().unwrap();
        assert_eq!(
            group.counter_increment(),
            Err(ParseError::InvalidValue("abc".into()))
        );
    }

    #[test]
    fn one_bad_group_does_not_discard_the_rest() {
        let line = Line::parse(b"gorets:bad:2|c").unwrap();
        let results: Vec<_> = line.groups().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap().bytes(), b"2|c");
    }
}
