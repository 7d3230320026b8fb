use std::collections::HashMap;

use arrow_schema::Schema;
use parquet::{
    arrow::ArrowSchemaConverter,
    basic::{Encoding, Type as PhysicalType},
    file::{
        metadata::KeyValue,
        properties::{self, EnabledStatistics},
    },
    schema::types::{ColumnDescriptor, ColumnPath},
};

use crate::{
    codec::Codec,
    error::{Error, Result},
    selection::path_selects,
};

/// Rows per row group when not configured.
pub const DEFAULT_MAX_ROW_GROUP_SIZE: usize = 1024 * 1024;

/// Creator string recorded in files this crate writes.
pub const DEFAULT_CREATED_BY: &str = concat!("parquet-bridge version ", env!("CARGO_PKG_VERSION"));

/// Parquet format version of the written pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriterVersion {
    #[default]
    V1,
    V2,
}

/// Granularity of the min/max statistics written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatisticsLevel {
    None,
    Chunk,
    #[default]
    Page,
}

/// Settings for one write.
///
/// Column paths are dotted field paths; a path naming a nested field applies to every leaf
/// below it.
#[derive(Debug, Clone)]
pub struct WriterProperties {
    compression: Codec,
    column_compression: Vec<(String, Codec)>,
    max_row_group_size: usize,
    created_by: String,
    writer_version: WriterVersion,
    dictionary_enabled: bool,
    column_dictionary: Vec<(String, bool)>,
    statistics: StatisticsLevel,
    data_page_size_limit: Option<usize>,
    dictionary_page_size_limit: Option<usize>,
    write_batch_size: Option<usize>,
    max_statistics_size: Option<usize>,
    encoding: Option<Encoding>,
    column_encoding: Vec<(String, Encoding)>,
    key_value_metadata: Vec<(String, String)>,
}

impl WriterProperties {
    /// Create a new builder for WriterProperties
    ///
    /// # Example
    /// ```
    /// use parquet_bridge::{Codec, WriterProperties};
    ///
    /// let properties = WriterProperties::builder()
    ///     .compression(Codec::Zstd)
    ///     .column_compression("payload", Codec::Brotli)
    ///     .max_row_group_size(10_000)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(properties.max_row_group_size(), 10_000);
    /// ```
    pub fn builder() -> WriterPropertiesBuilder {
        WriterPropertiesBuilder::default()
    }

    pub fn compression(&self) -> Codec {
        self.compression
    }

    /// Codec used for the leaf at `path`, falling back to the global codec.
    pub fn column_compression(&self, path: &str) -> Codec {
        self.column_compression
            .iter()
            .rev()
            .find(|(column, _)| path_selects(path, column))
            .map(|(_, codec)| *codec)
            .unwrap_or(self.compression)
    }

    pub fn max_row_group_size(&self) -> usize {
        self.max_row_group_size
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn writer_version(&self) -> WriterVersion {
        self.writer_version
    }

    pub fn dictionary_enabled(&self) -> bool {
        self.dictionary_enabled
    }

    pub fn statistics(&self) -> StatisticsLevel {
        self.statistics
    }

    pub fn data_page_size_limit(&self) -> Option<usize> {
        self.data_page_size_limit
    }

    pub fn dictionary_page_size_limit(&self) -> Option<usize> {
        self.dictionary_page_size_limit
    }

    pub fn write_batch_size(&self) -> Option<usize> {
        self.write_batch_size
    }

    pub fn max_statistics_size(&self) -> Option<usize> {
        self.max_statistics_size
    }

    pub fn encoding(&self) -> Option<Encoding> {
        self.encoding
    }

    /// Value encoding for the leaf at `path`, falling back to the global encoding. `None`
    /// leaves the choice to the parquet writer.
    pub fn column_encoding(&self, path: &str) -> Option<Encoding> {
        self.column_encoding
            .iter()
            .rev()
            .find(|(column, _)| path_selects(path, column))
            .map(|(_, encoding)| *encoding)
            .or(self.encoding)
    }

    pub fn key_value_metadata(&self) -> &[(String, String)] {
        &self.key_value_metadata
    }

    /// Key/value pairs stored in the footer: the schema's own metadata, overridden by pairs set
    /// on these properties.
    pub(crate) fn footer_metadata(&self, schema: &Schema) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = schema
            .metadata()
            .iter()
            .filter(|(key, _)| !self.key_value_metadata.iter().any(|(k, _)| k == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        pairs.sort();
        pairs.extend(self.key_value_metadata.iter().cloned());
        pairs
    }

    /// Map onto parquet writer properties for `schema`, resolving column paths to leaves.
    pub(crate) fn to_parquet(&self, schema: &Schema) -> Result<properties::WriterProperties> {
        let descriptor = ArrowSchemaConverter::new().convert(schema)?;
        let leaves: Vec<ColumnPath> = descriptor
            .columns()
            .iter()
            .map(|column| column.path().clone())
            .collect();
        for leaf in descriptor.columns() {
            if let Some(encoding) = self.column_encoding(&leaf.path().string()) {
                check_encoding(leaf, encoding)?;
            }
        }
        let leaves_under = |column: &str| -> Result<Vec<ColumnPath>> {
            let matched: Vec<ColumnPath> = leaves
                .iter()
                .filter(|leaf| path_selects(&leaf.string(), column))
                .cloned()
                .collect();
            if matched.is_empty() {
                return Err(Error::UnknownColumn(column.to_string()));
            }
            Ok(matched)
        };

        let mut builder = properties::WriterProperties::builder()
            .set_compression(self.compression.into())
            .set_max_row_group_size(self.max_row_group_size)
            .set_created_by(self.created_by.clone())
            .set_writer_version(match self.writer_version {
                WriterVersion::V1 => properties::WriterVersion::PARQUET_1_0,
                WriterVersion::V2 => properties::WriterVersion::PARQUET_2_0,
            })
            .set_dictionary_enabled(self.dictionary_enabled)
            .set_statistics_enabled(match self.statistics {
                StatisticsLevel::None => EnabledStatistics::None,
                StatisticsLevel::Chunk => EnabledStatistics::Chunk,
                StatisticsLevel::Page => EnabledStatistics::Page,
            });
        if let Some(limit) = self.data_page_size_limit {
            builder = builder.set_data_page_size_limit(limit);
        }
        if let Some(limit) = self.dictionary_page_size_limit {
            builder = builder.set_dictionary_page_size_limit(limit);
        }
        if let Some(rows) = self.write_batch_size {
            builder = builder.set_write_batch_size(rows);
        }
        if let Some(bytes) = self.max_statistics_size {
            #[allow(deprecated)]
            {
                builder = builder.set_max_statistics_size(bytes);
            }
        }
        if let Some(encoding) = self.encoding {
            builder = builder.set_encoding(encoding);
        }

        // later settings win, so apply in insertion order
        for (column, codec) in &self.column_compression {
            for leaf in leaves_under(column)? {
                builder = builder.set_column_compression(leaf, (*codec).into());
            }
        }
        for (column, enabled) in &self.column_dictionary {
            for leaf in leaves_under(column)? {
                builder = builder.set_column_dictionary_enabled(leaf, *enabled);
            }
        }
        for (column, encoding) in &self.column_encoding {
            for leaf in leaves_under(column)? {
                builder = builder.set_column_encoding(leaf, *encoding);
            }
        }

        let key_value_metadata = self.footer_metadata(schema);
        if !key_value_metadata.is_empty() {
            builder = builder.set_key_value_metadata(Some(
                key_value_metadata
                    .into_iter()
                    .map(|(key, value)| KeyValue::new(key, value))
                    .collect(),
            ));
        }

        Ok(builder.build())
    }
}

/// Reject encodings the parquet writer cannot produce for `leaf`'s physical type.
fn check_encoding(leaf: &ColumnDescriptor, encoding: Encoding) -> Result<()> {
    use PhysicalType::*;

    let physical = leaf.physical_type();
    let supported = match encoding {
        Encoding::PLAIN => true,
        Encoding::RLE => physical == BOOLEAN,
        Encoding::DELTA_BINARY_PACKED => matches!(physical, INT32 | INT64),
        Encoding::DELTA_LENGTH_BYTE_ARRAY => physical == BYTE_ARRAY,
        Encoding::DELTA_BYTE_ARRAY => matches!(physical, BYTE_ARRAY | FIXED_LEN_BYTE_ARRAY),
        Encoding::BYTE_STREAM_SPLIT => {
            matches!(physical, FLOAT | DOUBLE | INT32 | INT64 | FIXED_LEN_BYTE_ARRAY)
        }
        _ => false,
    };
    if supported {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "encoding {encoding} cannot be written for column {} of type {physical}",
            leaf.path().string()
        )))
    }
}

impl Default for WriterProperties {
    fn default() -> Self {
        Self {
            compression: Codec::Snappy,
            column_compression: Vec::new(),
            max_row_group_size: DEFAULT_MAX_ROW_GROUP_SIZE,
            created_by: DEFAULT_CREATED_BY.to_string(),
            writer_version: WriterVersion::default(),
            dictionary_enabled: true,
            column_dictionary: Vec::new(),
            statistics: StatisticsLevel::default(),
            data_page_size_limit: None,
            dictionary_page_size_limit: None,
            write_batch_size: None,
            max_statistics_size: None,
            encoding: None,
            column_encoding: Vec::new(),
            key_value_metadata: Vec::new(),
        }
    }
}

/// Builder for WriterProperties
#[derive(Debug, Clone, Default)]
pub struct WriterPropertiesBuilder {
    compression: Option<Codec>,
    column_compression: Vec<(String, Codec)>,
    max_row_group_size: Option<usize>,
    created_by: Option<String>,
    writer_version: Option<WriterVersion>,
    dictionary_enabled: Option<bool>,
    column_dictionary: Vec<(String, bool)>,
    statistics: Option<StatisticsLevel>,
    data_page_size_limit: Option<usize>,
    dictionary_page_size_limit: Option<usize>,
    write_batch_size: Option<usize>,
    max_statistics_size: Option<usize>,
    encoding: Option<Encoding>,
    column_encoding: Vec<(String, Encoding)>,
    key_value_metadata: HashMap<String, String>,
}

impl WriterPropertiesBuilder {
    /// Codec for every column without its own setting (default: snappy)
    pub fn compression(mut self, codec: Codec) -> Self {
        self.compression = Some(codec);
        self
    }

    /// Codec for the leaves at or below `path`
    pub fn column_compression(mut self, path: impl Into<String>, codec: Codec) -> Self {
        self.column_compression.push((path.into(), codec));
        self
    }

    /// Rows after which a new row group is started (default: 1048576)
    pub fn max_row_group_size(mut self, rows: usize) -> Self {
        self.max_row_group_size = Some(rows);
        self
    }

    pub fn created_by(mut self, value: impl Into<String>) -> Self {
        self.created_by = Some(value.into());
        self
    }

    /// Page format version (default: V1)
    pub fn writer_version(mut self, version: WriterVersion) -> Self {
        self.writer_version = Some(version);
        self
    }

    /// Whether dictionary encoding may be used (default: true)
    ///
    /// Dictionary encoding is an encoder decision; it never changes the type read back.
    pub fn dictionary_enabled(mut self, value: bool) -> Self {
        self.dictionary_enabled = Some(value);
        self
    }

    pub fn column_dictionary_enabled(mut self, path: impl Into<String>, value: bool) -> Self {
        self.column_dictionary.push((path.into(), value));
        self
    }

    /// Statistics granularity (default: page)
    pub fn statistics(mut self, level: StatisticsLevel) -> Self {
        self.statistics = Some(level);
        self
    }

    /// Best effort upper bound on data page size in bytes
    pub fn data_page_size_limit(mut self, bytes: usize) -> Self {
        self.data_page_size_limit = Some(bytes);
        self
    }

    /// Best effort upper bound on dictionary page size in bytes, after which a column falls
    /// back to its value encoding
    pub fn dictionary_page_size_limit(mut self, bytes: usize) -> Self {
        self.dictionary_page_size_limit = Some(bytes);
        self
    }

    /// Rows handed to the column encoders at a time, which bounds how often page size limits
    /// are checked
    pub fn write_batch_size(mut self, rows: usize) -> Self {
        self.write_batch_size = Some(rows);
        self
    }

    /// Largest min/max statistics value in bytes that is still written
    pub fn max_statistics_size(mut self, bytes: usize) -> Self {
        self.max_statistics_size = Some(bytes);
        self
    }

    /// Value encoding for every column without its own setting (default: chosen by the
    /// writer)
    ///
    /// With dictionary encoding enabled this is the fallback once a dictionary grows past
    /// its limit. Dictionary encodings themselves are switched on through
    /// [`WriterPropertiesBuilder::dictionary_enabled`].
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn column_encoding(mut self, path: impl Into<String>, encoding: Encoding) -> Self {
        self.column_encoding.push((path.into(), encoding));
        self
    }

    /// Extra footer key/value pair, stored byte for byte
    pub fn key_value_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.key_value_metadata.insert(key.into(), value.into());
        self
    }

    /// Build the WriterProperties, failing with [`Error::InvalidConfig`] for a zero size or
    /// limit, or a dictionary encoding passed as value encoding.
    pub fn build(self) -> Result<WriterProperties> {
        let max_row_group_size = self
            .max_row_group_size
            .unwrap_or(DEFAULT_MAX_ROW_GROUP_SIZE);
        if max_row_group_size == 0 {
            return Err(Error::InvalidConfig(
                "max_row_group_size must be greater than zero".into(),
            ));
        }
        for (name, value) in [
            ("data_page_size_limit", self.data_page_size_limit),
            ("dictionary_page_size_limit", self.dictionary_page_size_limit),
            ("write_batch_size", self.write_batch_size),
        ] {
            if value == Some(0) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        let dictionary = self
            .encoding
            .into_iter()
            .chain(self.column_encoding.iter().map(|(_, encoding)| *encoding))
            .find(|encoding| {
                matches!(encoding, Encoding::PLAIN_DICTIONARY | Encoding::RLE_DICTIONARY)
            });
        if let Some(encoding) = dictionary {
            return Err(Error::InvalidConfig(format!(
                "{encoding} is not a value encoding, enable dictionaries instead"
            )));
        }

        let mut key_value_metadata: Vec<(String, String)> =
            self.key_value_metadata.into_iter().collect();
        key_value_metadata.sort();

        Ok(WriterProperties {
            compression: self.compression.unwrap_or(Codec::Snappy),
            column_compression: self.column_compression,
            max_row_group_size,
            created_by: self
                .created_by
                .unwrap_or_else(|| DEFAULT_CREATED_BY.to_string()),
            writer_version: self.writer_version.unwrap_or_default(),
            dictionary_enabled: self.dictionary_enabled.unwrap_or(true),
            column_dictionary: self.column_dictionary,
            statistics: self.statistics.unwrap_or_default(),
            data_page_size_limit: self.data_page_size_limit,
            dictionary_page_size_limit: self.dictionary_page_size_limit,
            write_batch_size: self.write_batch_size,
            max_statistics_size: self.max_statistics_size,
            encoding: self.encoding,
            column_encoding: self.column_encoding,
            key_value_metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use arrow_schema::{DataType, Field, Fields};
    use parquet::basic::Compression;

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new(
                "location",
                DataType::Struct(Fields::from(vec![
                    Field::new("lat", DataType::Float64, true),
                    Field::new("lon", DataType::Float64, true),
                ])),
                true,
            ),
        ])
    }

    #[test]
    fn zero_row_group_size_is_rejected() {
        assert!(matches!(
            WriterProperties::builder().max_row_group_size(0).build(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn column_compression_reaches_nested_leaves() {
        let properties = WriterProperties::builder()
            .compression(Codec::Gzip)
            .column_compression("location", Codec::Zstd)
            .build()
            .unwrap();
        assert_eq!(properties.column_compression("location.lat"), Codec::Zstd);
        assert_eq!(properties.column_compression("id"), Codec::Gzip);

        let parquet = properties.to_parquet(&schema()).unwrap();
        let lat = ColumnPath::new(vec!["location".into(), "lat".into()]);
        let id = ColumnPath::new(vec!["id".into()]);
        assert!(matches!(parquet.compression(&lat), Compression::ZSTD(_)));
        assert!(matches!(parquet.compression(&id), Compression::GZIP(_)));
        assert_eq!(parquet.max_row_group_size(), DEFAULT_MAX_ROW_GROUP_SIZE);
    }

    #[test]
    fn encodings_are_checked_against_leaf_types() {
        assert!(matches!(
            WriterProperties::builder()
                .column_encoding("id", Encoding::RLE_DICTIONARY)
                .build(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            WriterProperties::builder().write_batch_size(0).build(),
            Err(Error::InvalidConfig(_))
        ));

        let properties = WriterProperties::builder()
            .encoding(Encoding::BYTE_STREAM_SPLIT)
            .column_encoding("id", Encoding::DELTA_BINARY_PACKED)
            .dictionary_page_size_limit(4096)
            .write_batch_size(256)
            .build()
            .unwrap();
        assert_eq!(
            properties.column_encoding("location.lat"),
            Some(Encoding::BYTE_STREAM_SPLIT)
        );
        let parquet = properties.to_parquet(&schema()).unwrap();
        let id = ColumnPath::new(vec!["id".into()]);
        assert_eq!(parquet.encoding(&id), Some(Encoding::DELTA_BINARY_PACKED));
        assert_eq!(parquet.dictionary_page_size_limit(), 4096);
        assert_eq!(parquet.write_batch_size(), 256);

        let properties = WriterProperties::builder()
            .column_encoding("location", Encoding::DELTA_BINARY_PACKED)
            .build()
            .unwrap();
        assert!(matches!(
            properties.to_parquet(&schema()),
            Err(Error::InvalidConfig(message)) if message.contains("location.lat")
        ));
    }

    #[test]
    fn unknown_column_is_reported() {
        let properties = WriterProperties::builder()
            .column_compression("missing", Codec::Zstd)
            .build()
            .unwrap();
        assert!(matches!(
            properties.to_parquet(&schema()),
            Err(Error::UnknownColumn(name)) if name == "missing"
        ));
    }

    #[test]
    fn explicit_pairs_override_schema_metadata() {
        let schema = schema().with_metadata(HashMap::from([
            ("geo".to_string(), "{}".to_string()),
            ("owner".to_string(), "a".to_string()),
        ]));
        let properties = WriterProperties::builder()
            .key_value_metadata("owner", "b")
            .build()
            .unwrap();
        assert_eq!(
            properties.footer_metadata(&schema),
            vec![
                ("geo".to_string(), "{}".to_string()),
                ("owner".to_string(), "b".to_string())
            ]
        );
    }
}
