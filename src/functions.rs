//! Column expressions used to build relations.

use crate::spark;
use crate::spark::expression::sort_order::{NullOrdering, SortDirection};
use crate::spark::expression::{ExprType, SortOrder, UnresolvedAttribute, UnresolvedFunction};

/// A column expression, resolved by the server when the plan runs.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub(crate) expression: spark::Expression,
}

impl Column {
    pub(crate) fn from_expr_type(expr_type: ExprType) -> Column {
        Column { expression: spark::Expression { expr_type: Some(expr_type) } }
    }

    /// Ascending order with nulls first, which is what Spark uses for `orderBy`.
    pub fn asc(self) -> Column {
        self.sort(SortDirection::Ascending, NullOrdering::SortNullsFirst)
    }

    /// Descending order with nulls last.
    pub fn desc(self) -> Column {
        self.sort(SortDirection::Descending, NullOrdering::SortNullsLast)
    }

    fn sort(self, direction: SortDirection, null_ordering: NullOrdering) -> Column {
        Column::from_expr_type(ExprType::SortOrder(
            sort_order(self.expression, direction, null_ordering).into()
        ))
    }

    /// Wraps the column in an ascending sort unless it already carries an order.
    pub(crate) fn into_sort_order(self) -> SortOrder {
        match self.expression.expr_type {
            Some(ExprType::SortOrder(order)) => *Box::<SortOrder>::from(order),
            expr_type => sort_order(
                spark::Expression { expr_type },
                SortDirection::Ascending,
                NullOrdering::SortNullsFirst,
            ),
        }
    }
}

fn sort_order(child: spark::Expression, direction: SortDirection, null_ordering: NullOrdering) -> SortOrder {
    SortOrder {
        child: Some(child.into()),
        direction: direction as i32,
        null_ordering: null_ordering as i32,
    }
}

impl From<&str> for Column {
    fn from(name: &str) -> Column {
        col(name)
    }
}

impl From<String> for Column {
    fn from(name: String) -> Column {
        col(&name)
    }
}

/// Refers to a column by name.
pub fn col(name: &str) -> Column {
    Column::from_expr_type(ExprType::UnresolvedAttribute(UnresolvedAttribute {
        unparsed_identifier: name.to_string(),
        plan_id: None,
    }))
}

pub(crate) fn call_function(name: &str, arguments: Vec<Column>) -> Column {
    Column::from_expr_type(ExprType::UnresolvedFunction(
        UnresolvedFunction {
            function_name: name.to_string(),
            arguments: arguments.into_iter().map(|column| column.expression).collect(),
            is_distinct: false,
            is_user_defined_function: false,
        }.into()
    ))
}

/// Average of the non-null values in a group. Spark names the result `avg(<column>)`.
pub fn avg(column: impl Into<Column>) -> Column {
    call_function("avg", vec![column.into()])
}
