use std::borrow::Cow;

use metrics::Label;

/// Where the rendered tags of a metric line are placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TagPlacement {
    /// Tags are appended to the metric name, before the `:` value separator.
    Name,

    /// Tags are appended after the value and type suffix.
    Suffix,
}

/// Wire dialect used to encode tags.
///
/// StatsD itself has no notion of tags, so every server that supports them has come up with its own convention. The
/// dialect must match what the receiving server understands, otherwise tags will end up mangled into the metric name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TagFormat {
    /// InfluxDB-style tags: `metric,name=value,other=value:1|c`.
    #[default]
    InfluxDb,

    /// Graphite tags: `metric;name=value;other=value:1|c`.
    Graphite,

    /// DogStatsD tags: `metric:1|c|#name:value,other:value`.
    Datadog,

    /// Okmeter tags: `metric.name_is_value.other_is_value:1|c`.
    Okmeter,
}

impl TagFormat {
    pub(crate) const fn placement(self) -> TagPlacement {
        match self {
            TagFormat::Datadog => TagPlacement::Suffix,
            TagFormat::InfluxDb | TagFormat::Graphite | TagFormat::Okmeter => TagPlacement::Name,
        }
    }

    const fn first_separator(self) -> &'static [u8] {
        match self {
            TagFormat::Datadog => b"|#",
            _ => self.separator(),
        }
    }

    const fn separator(self) -> &'static [u8] {
        match self {
            TagFormat::InfluxDb | TagFormat::Datadog => b",",
            TagFormat::Graphite => b";",
            TagFormat::Okmeter => b".",
        }
    }

    const fn key_value_separator(self) -> &'static [u8] {
        match self {
            TagFormat::InfluxDb | TagFormat::Graphite => b"=",
            TagFormat::Datadog => b":",
            TagFormat::Okmeter => b"_is_",
        }
    }
}

/// Value of a tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagValue {
    /// A string value, written verbatim.
    String(Cow<'static, str>),

    /// An integer value, written in base 10.
    Integer(i64),
}

/// A name/value pair attached to a metric.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    name: Cow<'static, str>,
    value: TagValue,
}

impl Tag {
    /// Creates a tag with a string value.
    ///
    /// Neither the name nor the value are escaped when written, so they must not contain characters that are
    /// meaningful to the selected [`TagFormat`].
    pub fn string<N, V>(name: N, value: V) -> Self
    where
        N: Into<Cow<'static, str>>,
        V: Into<Cow<'static, str>>,
    {
        Tag { name: name.into(), value: TagValue::String(value.into()) }
    }

    /// Creates a tag with an integer value.
    pub fn integer<N, V>(name: N, value: V) -> Self
    where
        N: Into<Cow<'static, str>>,
        V: Into<i64>,
    {
        Tag { name: name.into(), value: TagValue::Integer(value.into()) }
    }

    /// Returns the name of the tag.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value of the tag.
    pub fn value(&self) -> &TagValue {
        &self.value
    }

    /// Writes `name<separator>value` for the given format, without any leading separator.
    pub fn write(&self, buf: &mut Vec<u8>, format: TagFormat) {
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(format.key_value_separator());

        match &self.value {
            TagValue::String(s) => buf.extend_from_slice(s.as_bytes()),
            TagValue::Integer(i) => {
                let mut int_writer = itoa::Buffer::new();
                buf.extend_from_slice(int_writer.format(*i).as_bytes());
            }
        }
    }
}

impl From<&Label> for Tag {
    fn from(label: &Label) -> Self {
        Tag::string(label.key().to_owned(), label.value().to_owned())
    }
}

/// Writes the default tags followed by the call-site tags, including all separators.
///
/// Nothing is written when both tag sets are empty.
pub(crate) fn write_tags(buf: &mut Vec<u8>, format: TagFormat, default_tags: &[Tag], tags: &[Tag]) {
    for (i, tag) in default_tags.iter().chain(tags.iter()).enumerate() {
        if i == 0 {
            buf.extend_from_slice(format.first_separator());
        } else {
            buf.extend_from_slice(format.separator());
        }

        tag.write(buf, format);
    }
}

#[cfg(test)]
mod tests {
    use metrics::Label;

    use super::{write_tags, Tag, TagFormat};

    fn render_tag(tag: &Tag, format: TagFormat) -> String {
        let mut buf = Vec::new();
        tag.write(&mut buf, format);
        String::from_utf8(buf).unwrap()
    }

    fn render_tags(format: TagFormat, default_tags: &[Tag], tags: &[Tag]) -> String {
        let mut buf = Vec::new();
        write_tags(&mut buf, format, default_tags, tags);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn single_tag() {
        // Cases are defined as: tag, format, expected output.
        let cases = [
            (Tag::string("name", "value"), TagFormat::Datadog, "name:value"),
            (Tag::string("name", "value"), TagFormat::InfluxDb, "name=value"),
            (Tag::string("name", "value"), TagFormat::Graphite, "name=value"),
            (Tag::string("name", "value"), TagFormat::Okmeter, "name_is_value"),
            (Tag::integer("foo", -33), TagFormat::Datadog, "foo:-33"),
            (Tag::integer("foo", -33), TagFormat::InfluxDb, "foo=-33"),
            (Tag::integer("foo", -33), TagFormat::Graphite, "foo=-33"),
            (Tag::integer("foo", 1024i64 * 1024 * 1024 * 1024), TagFormat::Datadog, "foo:1099511627776"),
            (Tag::integer("foo", 1024i64 * 1024 * 1024 * 1024), TagFormat::InfluxDb, "foo=1099511627776"),
            (Tag::integer("foo", i64::MIN), TagFormat::Graphite, "foo=-9223372036854775808"),
            (Tag::integer("foo", 7u8), TagFormat::Okmeter, "foo_is_7"),
        ];

        for (tag, format, expected) in cases {
            assert_eq!(render_tag(&tag, format), expected, "format: {:?}", format);
        }
    }

    #[test]
    fn default_tags_precede_call_site_tags() {
        let default_tags = [Tag::string("host", "foo")];
        let tags = [Tag::string("type", "web"), Tag::integer("status", 200)];

        let cases = [
            (TagFormat::Datadog, "|#host:foo,type:web,status:200"),
            (TagFormat::InfluxDb, ",host=foo,type=web,status=200"),
            (TagFormat::Graphite, ";host=foo;type=web;status=200"),
            (TagFormat::Okmeter, ".host_is_foo.type_is_web.status_is_200"),
        ];

        for (format, expected) in cases {
            assert_eq!(render_tags(format, &default_tags, &tags), expected);
        }
    }

    #[test]
    fn only_call_site_tags() {
        let tags = [Tag::string("type", "web")];
        assert_eq!(render_tags(TagFormat::Datadog, &[], &tags), "|#type:web");
        assert_eq!(render_tags(TagFormat::Graphite, &[], &tags), ";type=web");
    }

    #[test]
    fn empty_tags() {
        for format in [TagFormat::Datadog, TagFormat::InfluxDb, TagFormat::Graphite, TagFormat::Okmeter] {
            assert_eq!(render_tags(format, &[], &[]), "");
        }
    }

    #[test]
    fn values_are_not_escaped() {
        let tag = Tag::string("path", "/a,b=c");
        assert_eq!(render_tag(&tag, TagFormat::InfluxDb), "path=/a,b=c");
    }

    #[test]
    fn from_label() {
        let label = Label::new("region", "us-east-1");
        let tag = Tag::from(&label);
        assert_eq!(tag.name(), "region");
        assert_eq!(render_tag(&tag, TagFormat::Datadog), "region:us-east-1");
    }
}
