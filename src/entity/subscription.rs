//! Subscription persistence

use redis::aio::MultiplexedConnection;

use crate::command::{self, Command};
use crate::entity::decode_list;
use crate::error::{Result, StoreError};
use crate::keys::make_key;
use crate::model::{make_timestamp, Subscription};
use crate::query;
use crate::store::{ensure_id, Store};

/// Primary ordered collection of subscriptions
pub const SUBSCRIPTION_COLLECTION: &str = "sn|sub";
/// Name → stored key hash
pub const SUBSCRIPTION_COLLECTION_NAME: &str = "sn|sub:name";
/// Category index prefix
pub const SUBSCRIPTION_COLLECTION_CATEGORY: &str = "sn|sub:category";
/// Label index prefix
pub const SUBSCRIPTION_COLLECTION_LABEL: &str = "sn|sub:label";
/// Receiver index prefix
pub const SUBSCRIPTION_COLLECTION_RECEIVER: &str = "sn|sub:receiver";

fn stored_key(id: &str) -> String {
    make_key(&[SUBSCRIPTION_COLLECTION, id])
}

/// Full command list for persisting a subscription and every index entry
pub fn add_commands(subscription: &Subscription) -> Result<Vec<Command>> {
    let blob = serde_json::to_vec(subscription).map_err(|e| {
        StoreError::ContractInvalid(format!(
            "unable to JSON marshal subscription for persistence: {}",
            e
        ))
    })?;
    let key = stored_key(&subscription.id);

    let mut commands = vec![
        Command::Set {
            key: key.clone(),
            value: blob,
        },
        Command::ZAdd {
            key: SUBSCRIPTION_COLLECTION.into(),
            score: subscription.modified,
            member: key.clone(),
        },
        Command::HSet {
            key: SUBSCRIPTION_COLLECTION_NAME.into(),
            field: subscription.name.clone(),
            value: key.clone(),
        },
        Command::ZAdd {
            key: make_key(&[SUBSCRIPTION_COLLECTION_RECEIVER, &subscription.receiver]),
            score: subscription.modified,
            member: key.clone(),
        },
    ];
    for category in &subscription.categories {
        commands.push(Command::ZAdd {
            key: make_key(&[SUBSCRIPTION_COLLECTION_CATEGORY, category]),
            score: subscription.modified,
            member: key.clone(),
        });
    }
    for label in &subscription.labels {
        commands.push(Command::ZAdd {
            key: make_key(&[SUBSCRIPTION_COLLECTION_LABEL, label]),
            score: subscription.modified,
            member: key.clone(),
        });
    }
    Ok(commands)
}

/// Symmetric removal list for a subscription
pub fn delete_commands(subscription: &Subscription) -> Vec<Command> {
    let key = stored_key(&subscription.id);
    let mut commands = vec![
        Command::Unlink { key: key.clone() },
        Command::ZRem {
            key: SUBSCRIPTION_COLLECTION.into(),
            member: key.clone(),
        },
        Command::HDel {
            key: SUBSCRIPTION_COLLECTION_NAME.into(),
            field: subscription.name.clone(),
        },
        Command::ZRem {
            key: make_key(&[SUBSCRIPTION_COLLECTION_RECEIVER, &subscription.receiver]),
            member: key.clone(),
        },
    ];
    for category in &subscription.categories {
        commands.push(Command::ZRem {
            key: make_key(&[SUBSCRIPTION_COLLECTION_CATEGORY, category]),
            member: key.clone(),
        });
    }
    for label in &subscription.labels {
        commands.push(Command::ZRem {
            key: make_key(&[SUBSCRIPTION_COLLECTION_LABEL, label]),
            member: key.clone(),
        });
    }
    commands
}

/// Add a new subscription
pub async fn add_subscription(
    conn: &mut MultiplexedConnection,
    mut subscription: Subscription,
) -> Result<Subscription> {
    if query::object_id_exists(conn, &stored_key(&subscription.id)).await? {
        return Err(StoreError::DuplicateName(format!(
            "subscription id {} already exists",
            subscription.id
        )));
    }
    if query::object_name_exists(conn, SUBSCRIPTION_COLLECTION_NAME, &subscription.name).await? {
        return Err(StoreError::DuplicateName(format!(
            "subscription name {} already exists",
            subscription.name
        )));
    }

    let ts = make_timestamp();
    if subscription.created == 0 {
        subscription.created = ts;
    }
    subscription.modified = ts;

    let commands = add_commands(&subscription)?;
    command::execute(conn, &commands, "subscription creation").await?;
    Ok(subscription)
}

/// Fetch a subscription by id
pub async fn subscription_by_id(
    conn: &mut MultiplexedConnection,
    id: &str,
) -> Result<Subscription> {
    query::object_by_id(conn, &stored_key(id)).await
}

/// Fetch a subscription by name
pub async fn subscription_by_name(
    conn: &mut MultiplexedConnection,
    name: &str,
) -> Result<Subscription> {
    query::object_by_name(conn, SUBSCRIPTION_COLLECTION_NAME, name).await
}

/// All subscriptions, most recently modified first
pub async fn all_subscriptions(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
) -> Result<Vec<Subscription>> {
    let objects = query::objects_by_rev_range(conn, SUBSCRIPTION_COLLECTION, offset, limit).await?;
    decode_list(objects, "subscription")
}

/// Subscriptions matching one category
pub async fn subscriptions_by_category(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    category: &str,
) -> Result<Vec<Subscription>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[SUBSCRIPTION_COLLECTION_CATEGORY, category]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "subscription")
}

/// Subscriptions matching one label
pub async fn subscriptions_by_label(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    label: &str,
) -> Result<Vec<Subscription>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[SUBSCRIPTION_COLLECTION_LABEL, label]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "subscription")
}

/// Subscriptions of one receiver
pub async fn subscriptions_by_receiver(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    receiver: &str,
) -> Result<Vec<Subscription>> {
    let objects = query::objects_by_rev_range(
        conn,
        &make_key(&[SUBSCRIPTION_COLLECTION_RECEIVER, receiver]),
        offset,
        limit,
    )
    .await?;
    decode_list(objects, "subscription")
}

/// Subscriptions matching any of the categories or labels (OR-semantics)
pub async fn subscriptions_by_categories_and_labels(
    conn: &mut MultiplexedConnection,
    offset: usize,
    limit: i64,
    categories: &[String],
    labels: &[String],
) -> Result<Vec<Subscription>> {
    let mut keys: Vec<String> = categories
        .iter()
        .map(|category| make_key(&[SUBSCRIPTION_COLLECTION_CATEGORY, category]))
        .collect();
    keys.extend(
        labels
            .iter()
            .map(|label| make_key(&[SUBSCRIPTION_COLLECTION_LABEL, label])),
    );

    let objects = query::union_objects_by_keys(conn, offset, limit, &keys).await?;
    decode_list(objects, "subscription")
}

/// Update a subscription; the name is the update key
pub async fn update_subscription(
    conn: &mut MultiplexedConnection,
    mut subscription: Subscription,
) -> Result<()> {
    let old_subscription = subscription_by_name(conn, &subscription.name).await?;

    subscription.id = old_subscription.id.clone();
    subscription.created = old_subscription.created;
    subscription.modified = make_timestamp();

    let mut commands = delete_commands(&old_subscription);
    commands.extend(add_commands(&subscription)?);
    command::execute(conn, &commands, "subscription update").await
}

/// Delete a subscription by name
pub async fn delete_subscription_by_name(
    conn: &mut MultiplexedConnection,
    name: &str,
) -> Result<()> {
    let subscription = subscription_by_name(conn, name).await?;
    let commands = delete_commands(&subscription);
    command::execute(conn, &commands, "subscription deletion").await
}

impl Store {
    /// Add a new subscription
    pub async fn add_subscription(&self, mut subscription: Subscription) -> Result<Subscription> {
        subscription.id = ensure_id(&subscription.id)?;
        let mut conn = self.conn().await?;
        add_subscription(&mut conn, subscription).await
    }

    /// Get a subscription by id
    pub async fn subscription_by_id(&self, id: &str) -> Result<Subscription> {
        let mut conn = self.conn().await?;
        subscription_by_id(&mut conn, id).await
    }

    /// Get a subscription by name
    pub async fn subscription_by_name(&self, name: &str) -> Result<Subscription> {
        let mut conn = self.conn().await?;
        subscription_by_name(&mut conn, name).await
    }

    /// Query subscriptions with offset and limit
    pub async fn all_subscriptions(&self, offset: usize, limit: i64) -> Result<Vec<Subscription>> {
        let mut conn = self.conn().await?;
        all_subscriptions(&mut conn, offset, limit).await
    }

    /// Query subscriptions by category with offset and limit
    pub async fn subscriptions_by_category(
        &self,
        offset: usize,
        limit: i64,
        category: &str,
    ) -> Result<Vec<Subscription>> {
        let mut conn = self.conn().await?;
        subscriptions_by_category(&mut conn, offset, limit, category).await
    }

    /// Query subscriptions by label with offset and limit
    pub async fn subscriptions_by_label(
        &self,
        offset: usize,
        limit: i64,
        label: &str,
    ) -> Result<Vec<Subscription>> {
        let mut conn = self.conn().await?;
        subscriptions_by_label(&mut conn, offset, limit, label).await
    }

    /// Query subscriptions by receiver with offset and limit
    pub async fn subscriptions_by_receiver(
        &self,
        offset: usize,
        limit: i64,
        receiver: &str,
    ) -> Result<Vec<Subscription>> {
        let mut conn = self.conn().await?;
        subscriptions_by_receiver(&mut conn, offset, limit, receiver).await
    }

    /// Query subscriptions matching any of the categories or labels
    pub async fn subscriptions_by_categories_and_labels(
        &self,
        offset: usize,
        limit: i64,
        categories: &[String],
        labels: &[String],
    ) -> Result<Vec<Subscription>> {
        let mut conn = self.conn().await?;
        subscriptions_by_categories_and_labels(&mut conn, offset, limit, categories, labels).await
    }

    /// Update a subscription
    pub async fn update_subscription(&self, subscription: Subscription) -> Result<()> {
        let mut conn = self.conn().await?;
        update_subscription(&mut conn, subscription).await
    }

    /// Delete a subscription by name
    pub async fn delete_subscription_by_name(&self, name: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        delete_subscription_by_name(&mut conn, name).await
    }

    /// Total subscription count
    pub async fn subscription_total_count(&self) -> Result<u32> {
        let mut conn = self.conn().await?;
        query::member_count(&mut conn, SUBSCRIPTION_COLLECTION).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_command_symmetry() {
        let subscription = Subscription {
            id: "cccccccc-0000-4000-8000-000000000010".into(),
            name: "ops-email".into(),
            categories: vec!["health".into(), "security".into()],
            labels: vec!["disk".into()],
            receiver: "ops".into(),
            description: String::new(),
            created: 1,
            modified: 2,
        };

        let adds = add_commands(&subscription).unwrap();
        let deletes = delete_commands(&subscription);
        // blob + primary + name + receiver + 2 categories + 1 label
        assert_eq!(adds.len(), 7);
        assert_eq!(adds.len(), deletes.len());
        assert!(adds.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "sn|sub:category:health")));
        assert!(adds.iter().any(|c| matches!(c, Command::ZAdd { key, .. }
            if key == "sn|sub:receiver:ops")));
    }
}
