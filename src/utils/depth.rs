//! Nesting limit shared by subtasks and comment replies.

use std::future::Future;

use uuid::Uuid;

/// Counts the ancestors above `parent` by following `parent_of`.
///
/// Returns `Some(depth)` when the chain ends within `max` steps and `None`
/// when every one of the `max` steps found another parent, i.e. adding a
/// child under `parent` would exceed the limit.
pub async fn ancestor_depth<F, Fut, E>(
    parent: Uuid,
    max: i32,
    mut parent_of: F,
) -> Result<Option<i32>, E>
where
    F: FnMut(Uuid) -> Fut,
    Fut: Future<Output = Result<Option<Uuid>, E>>,
{
    let mut depth = 0;
    let mut current = parent;
    while depth < max {
        match parent_of(current).await? {
            None => return Ok(Some(depth)),
            Some(next) => {
                depth += 1;
                current = next;
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Builds a chain root <- c1 <- c2 ... and returns the ids, root first.
    fn chain(len: usize) -> (Vec<Uuid>, HashMap<Uuid, Uuid>) {
        let ids: Vec<Uuid> = (0..len).map(|_| Uuid::new_v4()).collect();
        let parents = ids.windows(2).map(|pair| (pair[1], pair[0])).collect();
        (ids, parents)
    }

    async fn depth_of(parent: Uuid, max: i32, parents: &HashMap<Uuid, Uuid>) -> Option<i32> {
        ancestor_depth(parent, max, |id| {
            let found = parents.get(&id).copied();
            async move { Ok::<_, ()>(found) }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn root_parent_has_depth_zero() {
        let (ids, parents) = chain(1);
        assert_eq!(depth_of(ids[0], 3, &parents).await, Some(0));
    }

    #[tokio::test]
    async fn depth_counts_ancestors_above_parent() {
        let (ids, parents) = chain(3);
        assert_eq!(depth_of(ids[2], 3, &parents).await, Some(2));
    }

    #[tokio::test]
    async fn chain_reaching_the_limit_is_rejected() {
        let (ids, parents) = chain(4);
        assert_eq!(depth_of(ids[3], 3, &parents).await, None);
        assert_eq!(depth_of(ids[2], 3, &parents).await, Some(2));
    }

    #[tokio::test]
    async fn lookup_errors_propagate() {
        let result = ancestor_depth(Uuid::new_v4(), 3, |_| async { Err::<Option<Uuid>, _>("boom") })
            .await;
        assert_eq!(result, Err("boom"));
    }
}
