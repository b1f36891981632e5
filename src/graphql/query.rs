//! Query text rendering from selection descriptors.
//!
//! A query is described by a tree of [`Selection`]s: fields (optionally with
//! variable-bound arguments and sub-selections) and inline fragments. Every
//! argument references a variable of the same name, and every variable that
//! appears anywhere in the tree is declared once in the operation header.
//!
//! ```text
//! query($id: ID!) { node(id: $id) { id __typename } }
//! ```

use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    /// GraphQL type literal, e.g. `ID!` or `[CourseRole!]`.
    pub ty: String,
}

impl Variable {
    pub fn is_required(&self) -> bool {
        self.ty.ends_with('!')
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    args: Vec<Variable>,
    selection: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Field(Field),
    Fragment { on: String, selection: Vec<Selection> },
}

pub fn field(name: &str) -> Field {
    Field {
        name: name.to_string(),
        args: Vec::new(),
        selection: Vec::new(),
    }
}

/// `... on TypeName { ... }`
pub fn on<I, S>(type_name: &str, selection: I) -> Selection
where
    I: IntoIterator<Item = S>,
    S: Into<Selection>,
{
    Selection::Fragment {
        on: type_name.to_string(),
        selection: selection.into_iter().map(Into::into).collect(),
    }
}

impl Field {
    /// Adds `name: $name` bound to a variable of type `ty`.
    pub fn arg(mut self, name: &str, ty: &str) -> Self {
        self.args.push(Variable {
            name: name.to_string(),
            ty: ty.to_string(),
        });
        self
    }

    pub fn select<I, S>(mut self, selection: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Selection>,
    {
        self.selection.extend(selection.into_iter().map(Into::into));
        self
    }
}

impl From<Field> for Selection {
    fn from(field: Field) -> Self {
        Selection::Field(field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    name: Option<String>,
    selection: Vec<Selection>,
}

impl Operation {
    pub fn query<I, S>(selection: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Selection>,
    {
        Self {
            name: None,
            selection: selection.into_iter().map(Into::into).collect(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Renders the operation text and collects its variable declarations.
    pub fn build(&self) -> Result<QueryText, QueryError> {
        let mut variables = Vec::new();
        let mut body = String::new();
        write_selection(&mut body, &self.selection, &mut variables)?;

        let mut text = String::from("query");
        if let Some(name) = &self.name {
            text.push(' ');
            text.push_str(name);
        }
        if !variables.is_empty() {
            let decls: Vec<String> = variables
                .iter()
                .map(|v| format!("${}: {}", v.name, v.ty))
                .collect();
            let _ = write!(text, "({})", decls.join(", "));
        }
        let _ = write!(text, " {{{body} }}");

        Ok(QueryText { text, variables })
    }
}

fn write_selection(
    out: &mut String,
    selection: &[Selection],
    variables: &mut Vec<Variable>,
) -> Result<(), QueryError> {
    for item in selection {
        match item {
            Selection::Field(field) => {
                out.push(' ');
                out.push_str(&field.name);
                if !field.args.is_empty() {
                    let args: Vec<String> = field
                        .args
                        .iter()
                        .map(|a| format!("{}: ${}", a.name, a.name))
                        .collect();
                    let _ = write!(out, "({})", args.join(", "));
                    for arg in &field.args {
                        declare(variables, arg)?;
                    }
                }
                if !field.selection.is_empty() {
                    out.push_str(" {");
                    write_selection(out, &field.selection, variables)?;
                    out.push_str(" }");
                }
            }
            Selection::Fragment { on, selection } => {
                if selection.is_empty() {
                    return Err(QueryError::EmptyFragment(on.clone()));
                }
                let _ = write!(out, " ... on {on} {{");
                write_selection(out, selection, variables)?;
                out.push_str(" }");
            }
        }
    }
    Ok(())
}

fn declare(variables: &mut Vec<Variable>, var: &Variable) -> Result<(), QueryError> {
    match variables.iter().find(|v| v.name == var.name) {
        Some(existing) if existing.ty == var.ty => Ok(()),
        Some(existing) => Err(QueryError::ConflictingVariable {
            name: var.name.clone(),
            first: existing.ty.clone(),
            second: var.ty.clone(),
        }),
        None => {
            variables.push(var.clone());
            Ok(())
        }
    }
}

/// Rendered operation text plus the variables it declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryText {
    pub text: String,
    pub variables: Vec<Variable>,
}

impl QueryText {
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("variable ${name} is used as both {first} and {second}")]
    ConflictingVariable {
        name: String,
        first: String,
        second: String,
    },

    #[error("inline fragment on {0} selects no fields")]
    EmptyFragment(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_query_with_scalar_fields() {
        let query = Operation::query([field("node")
            .arg("id", "ID!")
            .select([field("id"), field("__typename")])])
        .build()
        .unwrap();

        assert_eq!(query.text, "query($id: ID!) { node(id: $id) { id __typename } }");
        assert_eq!(query.variables.len(), 1);
        assert!(query.variable("id").unwrap().is_required());
    }

    #[test]
    fn nested_object_selection() {
        let query = Operation::query([field("node")
            .arg("id", "ID!")
            .select([field("id"), field("cats").select([field("id"), field("name")])])])
        .build()
        .unwrap();

        assert_eq!(
            query.text,
            "query($id: ID!) { node(id: $id) { id cats { id name } } }"
        );
    }

    #[test]
    fn named_operation_with_fragment_and_scalar_args() {
        let query = Operation::query([field("node").arg("id", "ID!").select([on(
            "CodexMetadata",
            [
                field("id"),
                field("kernelSpec").select([
                    field("buildStatus"),
                    field("buildLog").arg("offset", "Int").arg("limit", "Int"),
                ]),
            ],
        )])])
        .named("Build")
        .build()
        .unwrap();

        assert_eq!(
            query.text,
            "query Build($id: ID!, $offset: Int, $limit: Int) { node(id: $id) { ... on CodexMetadata { id kernelSpec { buildStatus buildLog(offset: $offset, limit: $limit) } } } }"
        );
        assert!(!query.variable("offset").unwrap().is_required());
    }

    #[test]
    fn repeated_variable_is_declared_once() {
        let query = Operation::query([
            field("a").arg("id", "ID!").select([field("x")]),
            field("b").arg("id", "ID!").select([field("y")]),
        ])
        .build()
        .unwrap();

        assert_eq!(
            query.text,
            "query($id: ID!) { a(id: $id) { x } b(id: $id) { y } }"
        );
    }

    #[test]
    fn conflicting_variable_types_are_rejected() {
        let err = Operation::query([
            field("a").arg("id", "ID!").select([field("x")]),
            field("b").arg("id", "String").select([field("y")]),
        ])
        .build()
        .unwrap_err();

        assert_eq!(
            err,
            QueryError::ConflictingVariable {
                name: "id".into(),
                first: "ID!".into(),
                second: "String".into(),
            }
        );
    }

    #[test]
    fn empty_fragment_is_rejected() {
        let empty: [Field; 0] = [];
        let err = Operation::query([field("node").select([on("Thing", empty)])])
            .build()
            .unwrap_err();
        assert_eq!(err, QueryError::EmptyFragment("Thing".into()));
    }

    #[test]
    fn query_without_variables() {
        let query = Operation::query([field("viewer").select([field("id")])])
            .build()
            .unwrap();
        assert_eq!(query.text, "query { viewer { id } }");
        assert!(query.variables.is_empty());
    }
}
