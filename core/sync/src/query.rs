//! Composable remote query descriptions and per-round batching.

use serde_json::{json, Map, Value};

use geosync_common::{Error, Result};

/// A variable a query accepts, e.g. `first: Int!`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    name: String,
    type_name: String,
}

impl Argument {
    /// Create an argument declaration.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    /// Argument name as used by the remote field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// GraphQL type of the argument.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

/// A named, composable unit of remote query.
///
/// `name` is the remote connection field, `selection_fragment` is what is
/// selected inside `nodes { }`, and `fragment_dependencies` are the full
/// fragment definitions the selection spreads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQuery {
    name: String,
    selection_fragment: String,
    declared_arguments: Vec<Argument>,
    fragment_dependencies: Vec<String>,
}

impl SyncQuery {
    /// Create a query with no arguments or fragment dependencies.
    pub fn new(name: impl Into<String>, selection_fragment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selection_fragment: selection_fragment.into(),
            declared_arguments: Vec::new(),
            fragment_dependencies: Vec::new(),
        }
    }

    /// Declare an argument.
    pub fn with_argument(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.declared_arguments.push(Argument::new(name, type_name));
        self
    }

    /// Add a fragment definition the selection depends on.
    pub fn with_fragment(mut self, definition: impl Into<String>) -> Self {
        self.fragment_dependencies.push(definition.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn selection_fragment(&self) -> &str {
        &self.selection_fragment
    }

    pub fn declared_arguments(&self) -> &[Argument] {
        &self.declared_arguments
    }

    pub fn fragment_dependencies(&self) -> &[String] {
        &self.fragment_dependencies
    }

    /// Check whether `name` is a declared argument.
    pub fn declares(&self, name: &str) -> bool {
        self.declared_arguments.iter().any(|a| a.name == name)
    }
}

/// One page request of one participant: a query plus its variables.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    query: SyncQuery,
    variables: Map<String, Value>,
}

impl SyncRequest {
    /// Create a request.
    ///
    /// # Errors
    /// - A variable is not declared as an argument of `query`
    pub fn new(query: SyncQuery, variables: Map<String, Value>) -> Result<Self> {
        if let Some(undeclared) = variables.keys().find(|k| !query.declares(k)) {
            return Err(Error::InvalidInput(format!(
                "query '{}' does not declare argument '{}'",
                query.name, undeclared
            )));
        }
        Ok(Self { query, variables })
    }

    pub fn query(&self) -> &SyncQuery {
        &self.query
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Get a single variable.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

/// All active participants' requests of one round, as a single operation.
///
/// Every request becomes a sub-selection aliased by its participant name;
/// variables are namespaced as `{alias}_{argument}` so participants never
/// collide.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchedQuery {
    operation: String,
    variables: Map<String, Value>,
    aliases: Vec<String>,
}

impl BatchedQuery {
    /// Operation name of every batched document.
    pub const OPERATION_NAME: &'static str = "GeoSync";

    /// Compose one operation from `(alias, request)` pairs.
    pub fn compose<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a SyncRequest)>,
    {
        let mut definitions = Vec::new();
        let mut selections = String::new();
        let mut fragments: Vec<&str> = Vec::new();
        let mut variables = Map::new();
        let mut aliases = Vec::new();

        for (alias, request) in entries {
            let query = request.query();
            let mut args = Vec::new();

            for argument in query.declared_arguments() {
                let Some(value) = request.variable(argument.name()) else {
                    continue;
                };
                let variable = format!("{}_{}", alias, argument.name());
                definitions.push(format!("${}: {}", variable, argument.type_name()));
                args.push(format!("{}: ${}", argument.name(), variable));
                variables.insert(variable, value.clone());
            }

            let args = if args.is_empty() {
                String::new()
            } else {
                format!("({})", args.join(", "))
            };
            selections.push_str(&format!(
                "  {alias}: {name}{args} {{\n    nodes {{\n      {selection}\n    }}\n    pageInfo {{\n      endCursor\n      hasNextPage\n    }}\n  }}\n",
                alias = alias,
                name = query.name(),
                args = args,
                selection = query.selection_fragment(),
            ));

            for fragment in query.fragment_dependencies() {
                if !fragments.contains(&fragment.as_str()) {
                    fragments.push(fragment);
                }
            }
            aliases.push(alias.to_string());
        }

        let header = if definitions.is_empty() {
            format!("query {}", Self::OPERATION_NAME)
        } else {
            format!("query {}({})", Self::OPERATION_NAME, definitions.join(", "))
        };
        let mut operation = format!("{} {{\n{}}}\n", header, selections);
        for fragment in fragments {
            operation.push('\n');
            operation.push_str(fragment.trim());
            operation.push('\n');
        }

        Self {
            operation,
            variables,
            aliases,
        }
    }

    /// The GraphQL operation text.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Namespaced variables of the whole operation.
    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Participant aliases in the order they were composed.
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Variable `argument` of the sub-selection aliased `alias`.
    pub fn variable(&self, alias: &str, argument: &str) -> Option<&Value> {
        self.variables.get(&format!("{}_{}", alias, argument))
    }

    /// Standard GraphQL-over-HTTP request body.
    pub fn to_body(&self) -> Value {
        json!({
            "operationName": Self::OPERATION_NAME,
            "query": self.operation,
            "variables": self.variables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: &str = "fragment PlaceFields on Place { id name }";

    fn places_query() -> SyncQuery {
        SyncQuery::new("places", "...PlaceFields")
            .with_argument("first", "Int!")
            .with_argument("after", "String")
            .with_fragment(FRAGMENT)
    }

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_request_rejects_undeclared_variable() {
        let result = SyncRequest::new(places_query(), vars(json!({"first": 10, "before": "x"})));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_compose_namespaces_variables_per_alias() {
        let a = SyncRequest::new(places_query(), vars(json!({"first": 10, "after": "c1"}))).unwrap();
        let b = SyncRequest::new(places_query(), vars(json!({"first": 5}))).unwrap();

        let batch = BatchedQuery::compose([("home", &a), ("work", &b)]);

        assert_eq!(batch.aliases(), &["home".to_string(), "work".to_string()]);
        assert_eq!(batch.variable("home", "after"), Some(&json!("c1")));
        assert_eq!(batch.variable("work", "first"), Some(&json!(5)));
        assert_eq!(batch.variable("work", "after"), None);

        let op = batch.operation();
        assert!(op.starts_with(
            "query GeoSync($home_first: Int!, $home_after: String, $work_first: Int!)"
        ));
        assert!(op.contains("home: places(first: $home_first, after: $home_after) {"));
        assert!(op.contains("work: places(first: $work_first) {"));
        assert!(op.contains("endCursor"));
        assert_eq!(op.matches("fragment PlaceFields").count(), 1);
    }

    #[test]
    fn test_compose_without_variables() {
        let request = SyncRequest::new(SyncQuery::new("ping", "id"), Map::new()).unwrap();
        let batch = BatchedQuery::compose([("ping", &request)]);

        assert!(batch.operation().starts_with("query GeoSync {\n  ping: ping {"));
        assert!(batch.variables().is_empty());
    }

    #[test]
    fn test_body_shape() {
        let request = SyncRequest::new(places_query(), vars(json!({"first": 1}))).unwrap();
        let body = BatchedQuery::compose([("home", &request)]).to_body();

        assert_eq!(body["operationName"], json!("GeoSync"));
        assert_eq!(body["variables"]["home_first"], json!(1));
        assert!(body["query"].as_str().unwrap().contains("home: places"));
    }
}
