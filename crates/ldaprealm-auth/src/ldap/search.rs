//! LDAP search builder
//!
//! Filters are templates with positional placeholders (`{0}`, `{1}`, ...).
//! Parameter values are always escaped before substitution.

use ldaprealm_core::{Error, Result};
use tracing::debug;

use crate::ldap::context::DirContext;
use crate::ldap::directory::{EntryCursor, Scope, SearchRequest};
use crate::ldap::types::{Entry, SearchLimits};

/// Escapes a value for use inside an LDAP filter (RFC 4515).
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\5c"),
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\0' => escaped.push_str("\\00"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Replaces `{n}` with the escaped n-th parameter. Unknown indices are kept.
pub fn substitute(template: &str, parameters: &[String]) -> String {
    let mut filter = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        filter.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let placeholder = after
            .find('}')
            .and_then(|end| after[..end].parse::<usize>().ok().map(|idx| (idx, end)));

        match placeholder {
            Some((idx, end)) if idx < parameters.len() => {
                filter.push_str(&escape_filter_value(&parameters[idx]));
                rest = &after[end + 1..];
            }
            _ => {
                filter.push('{');
                rest = after;
            }
        }
    }
    filter.push_str(rest);
    filter
}

/// A search against one directory context
#[derive(Debug, Clone, Default)]
pub struct LdapSearch {
    base_dn: String,
    request: String,
    parameters: Vec<String>,
    scope: Scope,
    attributes: Vec<String>,
    limits: SearchLimits,
}

impl LdapSearch {
    pub fn new(base_dn: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            request: "(objectClass=*)".to_string(),
            ..Default::default()
        }
    }

    pub fn request(mut self, request: impl Into<String>) -> Self {
        self.request = request.into();
        self
    }

    pub fn parameters<I, S>(mut self, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = parameters.into_iter().map(Into::into).collect();
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Attributes to return; none means all user attributes.
    pub fn returning<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn limits(mut self, limits: SearchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    /// The filter sent to the directory
    pub fn filter(&self) -> String {
        substitute(&self.request, &self.parameters)
    }

    fn to_request(&self) -> SearchRequest {
        SearchRequest {
            base_dn: self.base_dn.clone(),
            scope: self.scope,
            filter: self.filter(),
            attributes: self.attributes.clone(),
            limits: self.limits,
        }
    }

    /// Starts the search. Entries are fetched as the cursor advances.
    pub async fn execute<'a>(&self, context: &'a mut DirContext) -> Result<SearchResults<'a>> {
        let request = self.to_request();
        debug!(
            base_dn = %request.base_dn,
            filter = %request.filter,
            scope = ?request.scope,
            "Search"
        );
        let cursor = context.search(&request).await?;
        Ok(SearchResults {
            cursor,
            done: false,
        })
    }

    /// The single matching entry, `None` when nothing matches.
    ///
    /// The size limit is raised to two whatever the configured value, so a
    /// limit of one cannot hide a second match.
    pub async fn find_unique(&self, context: &mut DirContext) -> Result<Option<Entry>> {
        let search = LdapSearch {
            limits: SearchLimits {
                size_limit: 2,
                ..self.limits
            },
            ..self.clone()
        };
        let mut results = search.execute(context).await?;
        let first = match results.next().await? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if results.next().await?.is_some() {
            results.abandon().await;
            return Err(Error::Search(format!(
                "Non unique result for {}",
                self.filter()
            )));
        }
        Ok(Some(first))
    }
}

/// Lazy, non-restartable search results borrowing their context
pub struct SearchResults<'a> {
    cursor: Box<dyn EntryCursor + 'a>,
    done: bool,
}

impl<'a> SearchResults<'a> {
    pub async fn next(&mut self) -> Result<Option<Entry>> {
        if self.done {
            return Ok(None);
        }
        let entry = self.cursor.next_entry().await;
        if !matches!(entry, Ok(Some(_))) {
            self.done = true;
        }
        entry
    }

    /// Stops reading; later calls to `next` return `None`.
    pub async fn abandon(&mut self) {
        if !self.done {
            self.done = true;
            self.cursor.abandon().await;
        }
    }

    pub async fn collect_all(mut self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::context::ContextFactory;
    use crate::ldap::testing::sample_directory;
    use crate::ldap::types::ServerConfig;
    use std::sync::Arc;

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_filter_value("tester"), "tester");
        assert_eq!(escape_filter_value("*"), "\\2a");
        assert_eq!(escape_filter_value("a(b)c"), "a\\28b\\29c");
        assert_eq!(escape_filter_value("back\\slash"), "back\\5cslash");
        assert_eq!(escape_filter_value("nul\0"), "nul\\00");
    }

    #[test]
    fn test_substitute_positional_parameters() {
        let filter = substitute(
            "(&(objectClass=groupOfUniqueNames)(|(memberUid={0})(uniqueMember={1})))",
            &["tester".to_string(), "uid=tester,ou=users,dc=example,dc=org".to_string()],
        );
        assert_eq!(
            filter,
            "(&(objectClass=groupOfUniqueNames)(|(memberUid=tester)(uniqueMember=uid=tester,ou=users,dc=example,dc=org)))"
        );
    }

    #[test]
    fn test_substitute_cannot_inject_filter_syntax() {
        let filter = substitute(
            "(&(objectClass=inetOrgPerson)(uid={0}))",
            &["*)(uid=*".to_string()],
        );
        assert_eq!(filter, "(&(objectClass=inetOrgPerson)(uid=\\2a\\29\\28uid=\\2a))");
        assert_eq!(filter.matches('(').count(), 3);
    }

    #[test]
    fn test_substitute_keeps_unknown_placeholders() {
        assert_eq!(substitute("(cn={2})", &["a".to_string()]), "(cn={2})");
        assert_eq!(substitute("(cn={x}", &[]), "(cn={x}");
    }

    async fn bind_context(directory: &crate::ldap::testing::MemoryDirectory) -> DirContext {
        let factory = ContextFactory::new(
            Arc::new(ServerConfig::new("default", "ldap://localhost:1024")),
            Arc::new(directory.clone()),
        );
        factory.create_bind_context().await.unwrap()
    }

    #[tokio::test]
    async fn test_find_unique() {
        let directory = sample_directory();
        let mut context = bind_context(&directory).await;

        let entry = LdapSearch::new("dc=example,dc=org")
            .request("(&(objectClass=inetOrgPerson)(uid={0}))")
            .parameters(["tester"])
            .find_unique(&mut context)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.dn, "uid=tester,ou=users,dc=example,dc=org");

        let missing = LdapSearch::new("dc=example,dc=org")
            .request("(&(objectClass=inetOrgPerson)(uid={0}))")
            .parameters(["*"])
            .find_unique(&mut context)
            .await
            .unwrap();
        assert!(missing.is_none());

        context.close().await;
        assert_eq!(directory.opened(), directory.closed());
    }

    #[tokio::test]
    async fn test_find_unique_rejects_several_matches() {
        let directory = sample_directory();
        let mut context = bind_context(&directory).await;

        let err = LdapSearch::new("dc=example,dc=org")
            .request("(objectClass=inetOrgPerson)")
            .find_unique(&mut context)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Search(_)));
        context.close().await;
    }

    #[tokio::test]
    async fn test_find_unique_ignores_size_limit_of_one() {
        let directory = sample_directory();
        let mut context = bind_context(&directory).await;

        let err = LdapSearch::new("dc=example,dc=org")
            .request("(|(uid={0})(objectClass=inetOrgPerson))")
            .parameters(["godin"])
            .limits(SearchLimits { size_limit: 1, time_limit: 0 })
            .find_unique(&mut context)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Non unique result"));

        let entry = LdapSearch::new("dc=example,dc=org")
            .request("(uid={0})")
            .parameters(["godin"])
            .limits(SearchLimits { size_limit: 1, time_limit: 0 })
            .find_unique(&mut context)
            .await
            .unwrap();
        assert_eq!(entry.unwrap().dn, "uid=godin,ou=users,dc=example,dc=org");

        context.close().await;
        assert_eq!(directory.opened(), directory.closed());
    }

    #[tokio::test]
    async fn test_results_are_lazy_and_finite() {
        let directory = sample_directory();
        let mut context = bind_context(&directory).await;

        let mut results = LdapSearch::new("ou=users,dc=example,dc=org")
            .request("(objectClass=inetOrgPerson)")
            .execute(&mut context)
            .await
            .unwrap();
        assert!(results.next().await.unwrap().is_some());
        results.abandon().await;
        assert!(results.next().await.unwrap().is_none());
        drop(results);

        let all = LdapSearch::new("ou=users,dc=example,dc=org")
            .request("(objectClass=inetOrgPerson)")
            .scope(Scope::OneLevel)
            .execute(&mut context)
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert!(all.len() > 1);
        context.close().await;
    }

    #[tokio::test]
    async fn test_size_limit_is_passed_to_directory() {
        let directory = sample_directory();
        let mut context = bind_context(&directory).await;

        let entries = LdapSearch::new("dc=example,dc=org")
            .request("(objectClass=inetOrgPerson)")
            .limits(SearchLimits { size_limit: 1, time_limit: 5 })
            .execute(&mut context)
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        context.close().await;
    }
}
