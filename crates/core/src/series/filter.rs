use super::series_model::{ExtractorKind, SeriesDefinition};

/// Conjunctive selection over series definitions. Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesFilter {
    pub kind: Option<ExtractorKind>,
    pub data_source: Option<String>,
    pub asset_type: Option<String>,
    pub schema: Option<String>,
}

impl SeriesFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: ExtractorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn data_source(mut self, data_source: impl Into<String>) -> Self {
        self.data_source = Some(data_source.into());
        self
    }

    pub fn asset_type(mut self, asset_type: impl Into<String>) -> Self {
        self.asset_type = Some(asset_type.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn matches(&self, series: &SeriesDefinition) -> bool {
        self.kind.map_or(true, |k| series.extractor_kind == k)
            && self
                .data_source
                .as_deref()
                .map_or(true, |ds| series.data_source == ds)
            && self
                .asset_type
                .as_deref()
                .map_or(true, |t| series.asset_type.eq_ignore_ascii_case(t))
            && self
                .schema
                .as_deref()
                .map_or(true, |s| series.schema_name == s)
    }
}
