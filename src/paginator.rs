use std::collections::BTreeMap;
use std::fmt;
use std::iter::FusedIterator;

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    Client, Error, OAuthParameters, Response, Result, Transport, OAUTH_KEY_PREFIX, PAGE_KEY,
    PER_PAGE_KEY,
};

/// Forward-only iterator over a paged collection.
///
/// Pages are fetched lazily and in order as the cursor crosses a page boundary,
/// each one re-signed. A page that fails to load leaves the cursor on the last
/// item and [`Paginator::advance`] reports `false`.
pub struct Paginator<'c, T: Transport> {
    client: &'c Client<T>,
    first_page: u32,
    per_page: usize,
    max_results: Option<usize>,
    resources: BTreeMap<u32, Vec<Value>>,
    responses: BTreeMap<u32, Response>,
    item_cursor: usize,
    page_cursor: u32,
    fresh: bool,
    stalled: bool,
}

impl<'c, T: Transport> Paginator<'c, T> {
    pub fn new(client: &'c Client<T>, response: Response) -> Result<Self> {
        let resource = find_collection(response.to_value()?).unwrap_or_default();
        let request = response.request();
        let first_page = request
            .query_param(PAGE_KEY)
            .and_then(|p| p.trim().parse::<u32>().ok())
            .map(|p| p.max(1))
            .unwrap_or(1);
        let per_page = request
            .query_param(PER_PAGE_KEY)
            .and_then(|p| p.trim().parse::<usize>().ok())
            .unwrap_or(resource.len());

        let mut resources = BTreeMap::new();
        let mut responses = BTreeMap::new();
        resources.insert(first_page, resource);
        responses.insert(first_page, response);

        Ok(Paginator {
            client,
            first_page,
            per_page,
            max_results: None,
            resources,
            responses,
            item_cursor: 0,
            page_cursor: first_page,
            fresh: true,
            stalled: false,
        })
    }

    /// Caps the number of items handed out. Can be changed mid-iteration.
    pub fn limit_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn set_limit(&mut self, max_results: Option<usize>) {
        self.max_results = max_results;
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    pub fn first_page(&self) -> u32 {
        self.first_page
    }

    /// Number of pages fetched so far, the first one included.
    pub fn loaded_pages(&self) -> usize {
        self.resources.len()
    }

    pub fn rewind(&mut self) {
        self.item_cursor = 0;
        self.page_cursor = self.first_page;
        self.fresh = true;
        self.stalled = false;
    }

    pub fn has_more(&self) -> bool {
        self.resources
            .get(&self.page_cursor)
            .map(|items| self.item_cursor < items.len())
            .unwrap_or(false)
            && !self.loaded_max_results()
    }

    pub fn loaded_max_results(&self) -> bool {
        match self.max_results {
            None => false,
            Some(max) => {
                let pages_behind = (self.page_cursor - self.first_page) as usize;
                max <= pages_behind
                    .saturating_mul(self.per_page)
                    .saturating_add(self.item_cursor)
            }
        }
    }

    pub fn current(&self) -> Option<&Value> {
        if !self.has_more() {
            return None;
        }
        self.resources
            .get(&self.page_cursor)
            .and_then(|items| items.get(self.item_cursor))
    }

    /// Position of the current item across all pages.
    pub fn key(&self) -> usize {
        (self.page_cursor as usize)
            .saturating_sub(1)
            .saturating_mul(self.per_page)
            .saturating_add(self.item_cursor)
    }

    /// Moves to the next item, loading the next page when a page boundary is crossed.
    ///
    /// Returns `false` only when that page could not be loaded.
    pub fn advance(&mut self) -> bool {
        self.fresh = false;
        self.item_cursor += 1;

        if self.per_page == 0
            || self.item_cursor < self.per_page
            || self.item_cursor % self.per_page != 0
        {
            return true;
        }

        let Some(next_page) = self.page_cursor.checked_add(1) else {
            warn!(page = self.page_cursor, "no page follows the last representable page");
            self.item_cursor -= 1;
            return false;
        };
        if self.resources.contains_key(&next_page) {
            self.item_cursor = 0;
            self.page_cursor = next_page;
            return true;
        }
        if self.loaded_max_results() {
            return true;
        }

        match self.fetch_next_page() {
            Ok((items, response)) => {
                debug!(page = next_page, items = items.len(), "loaded next page");
                self.item_cursor = 0;
                self.page_cursor = next_page;
                self.resources.insert(next_page, items);
                self.responses.insert(next_page, response);
                true
            }
            Err(err) => {
                warn!(page = next_page, error = %err, "next page could not be loaded");
                self.item_cursor -= 1;
                false
            }
        }
    }

    fn fetch_next_page(&self) -> Result<(Vec<Value>, Response)> {
        let previous = self
            .responses
            .get(&self.page_cursor)
            .ok_or_else(|| Error::InvalidArgument(format!("page {} was never loaded", self.page_cursor)))?
            .request();
        let page = previous
            .query_param(PAGE_KEY)
            .and_then(|p| p.trim().parse::<u32>().ok())
            .map(|p| p.max(1))
            .unwrap_or(1)
            .checked_add(1)
            .ok_or_else(|| Error::InvalidArgument("page number overflows".to_string()))?;

        let mut url = previous.url().clone();
        let pairs: Vec<(String, String)> = previous
            .query_pairs()
            .into_iter()
            .filter(|(k, _)| k != PAGE_KEY && !k.starts_with(OAUTH_KEY_PREFIX))
            .chain(std::iter::once((PAGE_KEY.to_string(), page.to_string())))
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);

        let token = self.client.access_token();
        let request = self.client.sign(
            previous.copy_with_url(url),
            token.as_ref(),
            OAuthParameters::new(),
        )?;
        let response = self.client.execute_rest(&request)?;
        let items = find_collection(response.to_value()?).unwrap_or_default();
        Ok((items, response))
    }
}

impl<T: Transport> Iterator for Paginator<'_, T> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        if self.stalled {
            return None;
        }
        if self.fresh {
            self.fresh = false;
        } else if !self.advance() {
            self.stalled = true;
            return None;
        }
        let item = self.current().cloned();
        if item.is_none() {
            self.stalled = true;
        }
        item
    }
}

impl<T: Transport> FusedIterator for Paginator<'_, T> {}

impl<T: Transport> fmt::Debug for Paginator<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paginator")
            .field("first_page", &self.first_page)
            .field("per_page", &self.per_page)
            .field("max_results", &self.max_results)
            .field("loaded_pages", &self.resources.keys().collect::<Vec<_>>())
            .field("item_cursor", &self.item_cursor)
            .field("page_cursor", &self.page_cursor)
            .finish()
    }
}

/// The collection is wrapped one level deep: `{"photos": {"page": 1, "photo": [..]}}`.
fn find_collection(payload: &Value) -> Option<Vec<Value>> {
    payload.as_object()?.values().find_map(|wrapper| match wrapper {
        Value::Array(items) => Some(items.clone()),
        Value::Object(fields) => fields.values().find_map(|v| v.as_array().cloned()),
        _ => None,
    })
}
