//! IAM metadata operations (spec §4.6): users, groups, policy documents,
//! and access keys. Policy evaluation itself lives in `vaults3-auth`; this
//! module only persists and retrieves the records it acts on.

use crate::store::{MetaStore, decode, encode, meta_err};
use crate::tables::{ACCESS_KEYS, IAM_GROUPS, IAM_POLICIES, IAM_USERS};
use crate::types::{StoredAccessKey, StoredGroup, StoredPolicy, StoredUser};
use redb::ReadableTable;
use vaults3_common::Result;

impl MetaStore {
    pub fn create_user(&self, user: &StoredUser) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(IAM_USERS).map_err(meta_err)?;
            if table.get(user.user_id.as_str()).map_err(meta_err)?.is_some() {
                return Ok(());
            }
            table
                .insert(user.user_id.as_str(), encode(user)?.as_slice())
                .map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<StoredUser>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(IAM_USERS).map_err(meta_err)?;
        table.get(user_id).map_err(meta_err)?.map(|g| decode(g.value())).transpose()
    }

    pub fn delete_user(&self, user_id: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(IAM_USERS).map_err(meta_err)?;
            table.remove(user_id).map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn list_users(&self) -> Result<Vec<StoredUser>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(IAM_USERS).map_err(meta_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(meta_err)? {
            let (_, v) = row.map_err(meta_err)?;
            out.push(decode::<StoredUser>(v.value())?);
        }
        out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(out)
    }

    pub fn create_group(&self, group: &StoredGroup) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(IAM_GROUPS).map_err(meta_err)?;
            if table.get(group.group_id.as_str()).map_err(meta_err)?.is_some() {
                return Ok(());
            }
            table
                .insert(group.group_id.as_str(), encode(group)?.as_slice())
                .map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn get_group(&self, group_id: &str) -> Result<Option<StoredGroup>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(IAM_GROUPS).map_err(meta_err)?;
        table
            .get(group_id)
            .map_err(meta_err)?
            .map(|g| decode(g.value()))
            .transpose()
    }

    pub fn delete_group(&self, group_id: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(IAM_GROUPS).map_err(meta_err)?;
            table.remove(group_id).map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn put_policy(&self, policy: &StoredPolicy) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(IAM_POLICIES).map_err(meta_err)?;
            table
                .insert(policy.policy_id.as_str(), encode(policy)?.as_slice())
                .map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn get_policy(&self, policy_id: &str) -> Result<Option<StoredPolicy>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(IAM_POLICIES).map_err(meta_err)?;
        table
            .get(policy_id)
            .map_err(meta_err)?
            .map(|g| decode(g.value()))
            .transpose()
    }

    pub fn delete_policy(&self, policy_id: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(IAM_POLICIES).map_err(meta_err)?;
            table.remove(policy_id).map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    /// Create an access key if absent (idempotent, spec §4.6).
    pub fn create_access_key(&self, key: &StoredAccessKey) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(ACCESS_KEYS).map_err(meta_err)?;
            if table
                .get(key.access_key_id.as_str())
                .map_err(meta_err)?
                .is_some()
            {
                return Ok(());
            }
            table
                .insert(key.access_key_id.as_str(), encode(key)?.as_slice())
                .map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn get_access_key(&self, access_key_id: &str) -> Result<Option<StoredAccessKey>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(ACCESS_KEYS).map_err(meta_err)?;
        table
            .get(access_key_id)
            .map_err(meta_err)?
            .map(|g| decode(g.value()))
            .transpose()
    }

    pub fn delete_access_key(&self, access_key_id: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta_err)?;
        {
            let mut table = txn.open_table(ACCESS_KEYS).map_err(meta_err)?;
            table.remove(access_key_id).map_err(meta_err)?;
        }
        txn.commit().map_err(meta_err)?;
        Ok(())
    }

    pub fn list_access_keys_for_user(&self, user_id: &str) -> Result<Vec<StoredAccessKey>> {
        let txn = self.db.begin_read().map_err(meta_err)?;
        let table = txn.open_table(ACCESS_KEYS).map_err(meta_err)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(meta_err)? {
            let (_, v) = row.map_err(meta_err)?;
            let key: StoredAccessKey = decode(v.value())?;
            if key.user_id == user_id {
                out.push(key);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, MetaStore) {
        let dir = tempdir().unwrap();
        let store = MetaStore::open(dir.path().join("meta.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn create_user_is_idempotent() {
        let (_dir, store) = open_store();
        let user = StoredUser {
            user_id: "u1".into(),
            display_name: "Alice".into(),
            arn: "arn:aws:iam:::user/u1".into(),
            created_at: 0,
        };
        store.create_user(&user).unwrap();
        store.create_user(&user).unwrap();
        assert_eq!(store.list_users().unwrap().len(), 1);
    }

    #[test]
    fn access_keys_are_scoped_to_their_user() {
        let (_dir, store) = open_store();
        store
            .create_access_key(&StoredAccessKey {
                access_key_id: "AK1".into(),
                secret_access_key: "secret1".into(),
                user_id: "u1".into(),
                enabled: true,
                created_at: 0,
            })
            .unwrap();
        store
            .create_access_key(&StoredAccessKey {
                access_key_id: "AK2".into(),
                secret_access_key: "secret2".into(),
                user_id: "u2".into(),
                enabled: true,
                created_at: 0,
            })
            .unwrap();

        let keys = store.list_access_keys_for_user("u1").unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].access_key_id, "AK1");

        store.delete_access_key("AK1").unwrap();
        assert!(store.get_access_key("AK1").unwrap().is_none());
    }
}
