use std::io::Write as _;

use crate::tags::{write_tags, Tag, TagFormat, TagPlacement};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MetricType {
    Counter,
    Timing,
    Gauge,
    Set,
}

impl MetricType {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            MetricType::Counter => b"|c",
            MetricType::Timing => b"|ms",
            MetricType::Gauge => b"|g",
            MetricType::Set => b"|s",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum MetricValue<'a> {
    Integer(i64),
    FloatingPoint(f64),

    /// A relative change, always written with an explicit sign.
    IntegerDelta(i64),

    /// A relative change, always written with an explicit sign.
    FloatingPointDelta(f64),

    /// An opaque token, written verbatim.
    Token(&'a str),
}

struct MetricValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl MetricValueFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    fn write(&mut self, buf: &mut Vec<u8>, value: MetricValue<'_>) {
        match value {
            MetricValue::Integer(v) => buf.extend_from_slice(self.int_writer.format(v).as_bytes()),
            MetricValue::FloatingPoint(v) => self.write_float(buf, v),
            MetricValue::IntegerDelta(v) => {
                if v >= 0 {
                    buf.push(b'+');
                }
                buf.extend_from_slice(self.int_writer.format(v).as_bytes());
            }
            MetricValue::FloatingPointDelta(v) => {
                // Collapse negative zero so we never end up with `+-0`.
                let v = if v == 0.0 { 0.0 } else { v };
                if v >= 0.0 && v.is_finite() {
                    buf.push(b'+');
                }
                self.write_float(buf, v);
            }
            MetricValue::Token(s) => buf.extend_from_slice(s.as_bytes()),
        }
    }

    /// Writes the shortest decimal representation of `value` that round-trips, never in exponent form, and without a
    /// fractional part when the value is integral.
    ///
    /// Non-finite values are written as `NaN`, `+Inf` and `-Inf`. Infinities always carry their sign, so deltas don't
    /// get a second one.
    fn write_float(&mut self, buf: &mut Vec<u8>, value: f64) {
        if value.is_nan() {
            buf.extend_from_slice(b"NaN");
            return;
        }

        if value.is_infinite() {
            buf.extend_from_slice(if value > 0.0 { b"+Inf" } else { b"-Inf" });
            return;
        }

        let formatted = self.float_writer.format_finite(value);
        if formatted.contains('e') {
            // `Display` for floats is also shortest-round-trip, but never switches to scientific notation.
            let _ = write!(buf, "{}", value);
            return;
        }

        let formatted = formatted.strip_suffix(".0").unwrap_or(formatted);
        buf.extend_from_slice(formatted.as_bytes());
    }
}

/// Encodes metric lines.
///
/// Each line is written as `<prefix><name>[tags]:<value><type>[tags]\n`, where the tags are placed either in the name
/// or after the type depending on the configured [`TagFormat`]. Default tags always precede the per-call tags.
pub(crate) struct LineWriter {
    tag_format: TagFormat,
    default_tags: Vec<Tag>,
}

impl LineWriter {
    pub fn new(tag_format: TagFormat, default_tags: Vec<Tag>) -> Self {
        Self { tag_format, default_tags }
    }

    fn write_metric_header(&self, buf: &mut Vec<u8>, prefix: &str, name: &str, tags: &[Tag]) {
        buf.extend_from_slice(prefix.as_bytes());
        buf.extend_from_slice(name.as_bytes());

        if self.tag_format.placement() == TagPlacement::Name {
            write_tags(buf, self.tag_format, &self.default_tags, tags);
        }
    }

    fn write_metric_trailer(&self, buf: &mut Vec<u8>, metric_type: MetricType, tags: &[Tag]) {
        buf.extend_from_slice(metric_type.as_bytes());

        if self.tag_format.placement() == TagPlacement::Suffix {
            write_tags(buf, self.tag_format, &self.default_tags, tags);
        }

        buf.push(b'\n');
    }

    /// Appends a single metric line to `buf`.
    pub fn write_line(
        &self,
        buf: &mut Vec<u8>,
        prefix: &str,
        name: &str,
        value: MetricValue<'_>,
        metric_type: MetricType,
        tags: &[Tag],
    ) {
        self.write_metric_header(buf, prefix, name, tags);

        buf.push(b':');
        MetricValueFormatter::new().write(buf, value);

        self.write_metric_trailer(buf, metric_type, tags);
    }
}

#[cfg(test)]
mod tests {
    use super::{LineWriter, MetricType, MetricValue};
    use crate::tags::{Tag, TagFormat};

    fn render(
        writer: &LineWriter,
        prefix: &str,
        value: MetricValue<'_>,
        metric_type: MetricType,
        tags: &[Tag],
    ) -> String {
        let mut buf = Vec::new();
        writer.write_line(&mut buf, prefix, "req.count", value, metric_type, tags);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn values() {
        let writer = LineWriter::new(TagFormat::InfluxDb, Vec::new());

        // Cases are defined as: metric value, metric type, expected output.
        let cases = [
            (MetricValue::Integer(30), MetricType::Counter, "foo.req.count:30|c\n"),
            (MetricValue::Integer(-30), MetricType::Counter, "foo.req.count:-30|c\n"),
            (MetricValue::Integer(100), MetricType::Timing, "foo.req.count:100|ms\n"),
            (MetricValue::FloatingPoint(157.356), MetricType::Timing, "foo.req.count:157.356|ms\n"),
            (MetricValue::FloatingPoint(150.0), MetricType::Timing, "foo.req.count:150|ms\n"),
            (MetricValue::FloatingPoint(-533.3), MetricType::Gauge, "foo.req.count:-533.3|g\n"),
            (MetricValue::FloatingPoint(0.000_001), MetricType::Gauge, "foo.req.count:0.000001|g\n"),
            (MetricValue::FloatingPoint(1e20), MetricType::Gauge, "foo.req.count:100000000000000000000|g\n"),
            (MetricValue::FloatingPoint(f64::NAN), MetricType::Gauge, "foo.req.count:NaN|g\n"),
            (MetricValue::FloatingPoint(f64::INFINITY), MetricType::Gauge, "foo.req.count:+Inf|g\n"),
            (MetricValue::FloatingPoint(f64::NEG_INFINITY), MetricType::Timing, "foo.req.count:-Inf|ms\n"),
            (MetricValue::IntegerDelta(33), MetricType::Gauge, "foo.req.count:+33|g\n"),
            (MetricValue::IntegerDelta(0), MetricType::Gauge, "foo.req.count:+0|g\n"),
            (MetricValue::IntegerDelta(-533), MetricType::Gauge, "foo.req.count:-533|g\n"),
            (MetricValue::FloatingPointDelta(33.5), MetricType::Gauge, "foo.req.count:+33.5|g\n"),
            (MetricValue::FloatingPointDelta(-0.0), MetricType::Gauge, "foo.req.count:+0|g\n"),
            (MetricValue::FloatingPointDelta(-533.3), MetricType::Gauge, "foo.req.count:-533.3|g\n"),
            (MetricValue::FloatingPointDelta(f64::NAN), MetricType::Gauge, "foo.req.count:NaN|g\n"),
            (MetricValue::FloatingPointDelta(f64::INFINITY), MetricType::Gauge, "foo.req.count:+Inf|g\n"),
            (MetricValue::FloatingPointDelta(f64::NEG_INFINITY), MetricType::Gauge, "foo.req.count:-Inf|g\n"),
            (MetricValue::Token("bob"), MetricType::Set, "foo.req.count:bob|s\n"),
        ];

        for (value, metric_type, expected) in cases {
            assert_eq!(render(&writer, "foo.", value, metric_type, &[]), expected);
        }
    }

    #[test]
    fn empty_prefix() {
        let writer = LineWriter::new(TagFormat::InfluxDb, Vec::new());
        assert_eq!(render(&writer, "", MetricValue::Integer(1), MetricType::Counter, &[]), "req.count:1|c\n");
    }

    #[test]
    fn tags_in_name() {
        let writer = LineWriter::new(TagFormat::InfluxDb, vec![Tag::string("host", "foo")]);
        let tags = [Tag::string("type", "web"), Tag::integer("status", 200)];

        assert_eq!(
            render(&writer, "foo.", MetricValue::Integer(30), MetricType::Counter, &tags),
            "foo.req.count,host=foo,type=web,status=200:30|c\n"
        );

        let writer = LineWriter::new(TagFormat::Okmeter, Vec::new());
        assert_eq!(
            render(&writer, "", MetricValue::Token("bob"), MetricType::Set, &tags),
            "req.count.type_is_web.status_is_200:bob|s\n"
        );
    }

    #[test]
    fn tags_in_suffix() {
        let writer = LineWriter::new(TagFormat::Datadog, vec![Tag::string("host", "foo")]);
        let tags = [Tag::string("type", "web")];

        assert_eq!(
            render(&writer, "foo.", MetricValue::IntegerDelta(5), MetricType::Gauge, &tags),
            "foo.req.count:+5|g|#host:foo,type:web\n"
        );
        assert_eq!(
            render(&writer, "foo.", MetricValue::Integer(5), MetricType::Timing, &[]),
            "foo.req.count:5|ms|#host:foo\n"
        );
    }
}
