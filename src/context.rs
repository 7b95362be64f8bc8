use crate::types::UserId;

/// what an operation needs to know about the request it runs for
///
/// built by the http layer from the `x-user-id` header and the resolved
/// config, then handed explicitly to whatever needs it
#[derive(Debug, Clone, Copy)]
pub struct Ctx {
    /// the user performing the mutation
    pub actor: UserId,
    pub posts_per_page: i64,
}

impl Ctx {
    pub fn page_size(&self) -> usize {
        self.posts_per_page.max(1) as usize
    }
}
