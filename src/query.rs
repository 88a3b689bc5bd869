use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;
use url::{form_urlencoded, Url};

use crate::SlingError;

/// A value that url-encodes into query pairs.
pub(crate) trait QueryEncode: Send + Sync {
    fn encode(&self) -> Result<String, serde_urlencoded::ser::Error>;
}

pub(crate) struct QueryStruct<T>(pub(crate) T);

impl<T> QueryEncode for QueryStruct<T>
where
    T: Serialize + Send + Sync,
{
    fn encode(&self) -> Result<String, serde_urlencoded::ser::Error> {
        serde_urlencoded::to_string(&self.0)
    }
}

/// Rewrites the query of `url` from three sources: its existing query, each
/// struct in attachment order, then the flat params. Every source appends,
/// so repeated keys keep all their values. Keys come out sorted.
pub(crate) fn merge_query(
    url: &mut Url,
    structs: &[Arc<dyn QueryEncode>],
    params: &BTreeMap<String, String>,
) -> Result<(), SlingError> {
    let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (key, value) in url.query_pairs() {
        values
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }

    for query in structs {
        let encoded = query.encode().map_err(SlingError::QueryEncode)?;
        for (key, value) in form_urlencoded::parse(encoded.as_bytes()) {
            values
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
    }

    for (key, value) in params {
        values.entry(key.clone()).or_default().push(value.clone());
    }

    if values.is_empty() {
        url.set_query(None);
        return Ok(());
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, key_values) in &values {
        for value in key_values {
            serializer.append_pair(key, value);
        }
    }
    url.set_query(Some(&serializer.finish()));
    Ok(())
}
