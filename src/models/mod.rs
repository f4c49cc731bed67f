mod interaction;
mod recommendation;

pub use interaction::{now_timestamp, Action, Interaction, InteractionMessage, OneOrMany};
pub use recommendation::{NewItemsRequest, Recommendations};
