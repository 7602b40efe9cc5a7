mod get_health;
mod post_aggregate;
mod post_entities;
mod post_explain;
mod post_fact;

pub use get_health::get_health;
pub use post_aggregate::post_aggregate;
pub use post_entities::post_entities;
pub use post_explain::post_explain;
pub use post_fact::post_fact;

use crate::engine::QueryArguments;

use super::api::GetArguments;

/// Folds the body arguments and the header-borne select into the engine's
/// argument shape. The body select wins when both are present.
pub(crate) fn engine_arguments(
    arguments: GetArguments,
    header_select: Option<String>,
) -> QueryArguments {
    QueryArguments {
        filter: arguments.filter,
        order_by: arguments.orderby,
        descending: arguments.desc,
        select: arguments.select.or(header_select),
        expand: arguments.expand,
        search: arguments.search,
        inactive: arguments.inactive,
        skip: arguments.skip,
        top: arguments.top,
        count_entities: arguments.count_entities,
    }
}
