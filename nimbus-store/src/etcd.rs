use crate::db::{Database, Result};
use crate::error::StoreError;
use crate::schema::KeySchema;
use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, ConnectOptions, GetOptions, Txn, TxnOp};
use nimbus_core::{Cluster, Flavor, Image, Project, ServiceType};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

/// etcd-backed database for deployments where several processes share state.
///
/// Inserts are guarded by `create_revision == 0` transactions; cluster
/// updates additionally compare the key's `mod_revision` observed when the
/// stored record's revision was checked.
#[derive(Clone)]
pub struct EtcdDatabase {
    client: Client,
    schema: std::sync::Arc<KeySchema>,
}

impl EtcdDatabase {
    /// Connect to etcd. `timeout` bounds every request.
    pub async fn connect(endpoints: &[String], prefix: &str, timeout: std::time::Duration) -> Result<Self> {
        let options = ConnectOptions::new().with_timeout(timeout);
        let client = Client::connect(endpoints, Some(options)).await?;
        info!("Connected to etcd at {:?}", endpoints);
        Ok(Self {
            client,
            schema: std::sync::Arc::new(KeySchema::new(prefix)),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, key: String) -> Result<Option<(T, i64)>> {
        let mut client = self.client.clone();
        let resp = client.get(key, None).await?;
        match resp.kvs().first() {
            Some(kv) => Ok(Some((serde_json::from_slice(kv.value())?, kv.mod_revision()))),
            None => Ok(None),
        }
    }

    async fn list_json<T: DeserializeOwned>(&self, prefix: String) -> Result<Vec<T>> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        let mut items = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            match serde_json::from_slice::<T>(kv.value()) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!(error = %e, "Skipping malformed etcd record"),
            }
        }
        Ok(items)
    }

    async fn put_json<T: Serialize>(&self, key: String, value: &T) -> Result<()> {
        let mut client = self.client.clone();
        client.put(key, serde_json::to_vec(value)?, None).await?;
        Ok(())
    }

    async fn delete_key(&self, kind: &'static str, id: &str, key: String) -> Result<()> {
        let mut client = self.client.clone();
        if client.delete(key, None).await?.deleted() == 0 {
            return Err(StoreError::not_found(kind, id));
        }
        Ok(())
    }

    /// Put only if the key does not exist yet.
    async fn create_json<T: Serialize>(&self, kind: &'static str, id: &str, key: String, value: &T) -> Result<()> {
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when(vec![Compare::create_revision(key.clone(), CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(key, serde_json::to_vec(value)?, None)]);
        if !client.txn(txn).await?.succeeded() {
            return Err(StoreError::exists(kind, id));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for EtcdDatabase {
    async fn read_service_type(&self, name: &str) -> Result<Option<ServiceType>> {
        Ok(self
            .get_json(self.schema.service_type_key(name))
            .await?
            .map(|(st, _)| st))
    }

    async fn list_service_types(&self) -> Result<Vec<ServiceType>> {
        let mut types: Vec<ServiceType> = self.list_json(self.schema.service_types_prefix()).await?;
        types.sort_by(|a, b| a.service_type.cmp(&b.service_type));
        Ok(types)
    }

    async fn write_service_type(&self, service_type: &ServiceType) -> Result<()> {
        let key = self.schema.service_type_key(&service_type.service_type);
        self.create_json("service type", &service_type.service_type, key, service_type)
            .await
    }

    async fn update_service_type(&self, service_type: &ServiceType) -> Result<()> {
        let key = self.schema.service_type_key(&service_type.service_type);
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when(vec![Compare::create_revision(key.clone(), CompareOp::Greater, 0)])
            .and_then(vec![TxnOp::put(key, serde_json::to_vec(service_type)?, None)]);
        if !client.txn(txn).await?.succeeded() {
            return Err(StoreError::not_found("service type", &service_type.service_type));
        }
        Ok(())
    }

    async fn delete_service_type(&self, name: &str) -> Result<()> {
        self.delete_key("service type", name, self.schema.service_type_key(name))
            .await
    }

    async fn read_cluster(&self, project_id: &str, id_or_name: &str) -> Result<Option<Cluster>> {
        if let Some((cluster, _)) = self
            .get_json::<Cluster>(self.schema.cluster_key(id_or_name))
            .await?
            && cluster.project_id == project_id
        {
            return Ok(Some(cluster));
        }
        let Some((id, _)) = self
            .get_json::<String>(self.schema.cluster_name_key(project_id, id_or_name))
            .await?
        else {
            return Ok(None);
        };
        Ok(self
            .get_json::<Cluster>(self.schema.cluster_key(&id))
            .await?
            .map(|(c, _)| c))
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        self.list_json(self.schema.clusters_prefix()).await
    }

    async fn write_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        let mut stored = cluster.clone();
        stored.revision = 1;
        stored.created_at = Some(chrono::Utc::now());
        stored.updated_at = stored.created_at;

        let key = self.schema.cluster_key(&cluster.id);
        let name_key = self.schema.cluster_name_key(&cluster.project_id, &cluster.name);
        let mut client = self.client.clone();
        let txn = Txn::new()
            .when(vec![
                Compare::create_revision(key.clone(), CompareOp::Equal, 0),
                Compare::create_revision(name_key.clone(), CompareOp::Equal, 0),
            ])
            .and_then(vec![
                TxnOp::put(key, serde_json::to_vec(&stored)?, None),
                TxnOp::put(name_key, serde_json::to_vec(&cluster.id)?, None),
            ]);
        if !client.txn(txn).await?.succeeded() {
            return Err(StoreError::exists("cluster", &cluster.name));
        }
        Ok(stored)
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        let key = self.schema.cluster_key(&cluster.id);
        let (current, mod_revision) = self
            .get_json::<Cluster>(key.clone())
            .await?
            .ok_or_else(|| StoreError::not_found("cluster", &cluster.id))?;
        if current.revision != cluster.revision {
            return Err(StoreError::Conflict {
                id: cluster.id.clone(),
                expected: cluster.revision,
                found: current.revision,
            });
        }

        let mut next = cluster.clone();
        next.revision = current.revision + 1;
        next.created_at = current.created_at;
        next.updated_at = Some(chrono::Utc::now());

        let mut client = self.client.clone();
        let txn = Txn::new()
            .when(vec![Compare::mod_revision(key.clone(), CompareOp::Equal, mod_revision)])
            .and_then(vec![TxnOp::put(key, serde_json::to_vec(&next)?, None)]);
        if !client.txn(txn).await?.succeeded() {
            return Err(StoreError::Conflict {
                id: cluster.id.clone(),
                expected: cluster.revision,
                found: cluster.revision + 1,
            });
        }
        Ok(next)
    }

    async fn delete_cluster(&self, project_id: &str, id: &str) -> Result<()> {
        let key = self.schema.cluster_key(id);
        let (cluster, _) = self
            .get_json::<Cluster>(key.clone())
            .await?
            .filter(|(c, _)| c.project_id == project_id)
            .ok_or_else(|| StoreError::not_found("cluster", id))?;
        let mut client = self.client.clone();
        let txn = Txn::new().and_then(vec![
            TxnOp::delete(key, None),
            TxnOp::delete(self.schema.cluster_name_key(project_id, &cluster.name), None),
        ]);
        client.txn(txn).await?;
        Ok(())
    }

    async fn read_project(&self, id_or_name: &str) -> Result<Option<Project>> {
        if let Some((project, _)) = self.get_json::<Project>(self.schema.project_key(id_or_name)).await? {
            return Ok(Some(project));
        }
        Ok(self
            .list_projects()
            .await?
            .into_iter()
            .find(|p| p.name == id_or_name))
    }

    async fn write_project(&self, project: &Project) -> Result<()> {
        self.put_json(self.schema.project_key(&project.id), project).await
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        self.list_json(self.schema.projects_prefix()).await
    }

    async fn delete_project(&self, id: &str) -> Result<()> {
        self.delete_key("project", id, self.schema.project_key(id)).await
    }

    async fn read_image(&self, name: &str) -> Result<Option<Image>> {
        Ok(self.get_json(self.schema.image_key(name)).await?.map(|(i, _)| i))
    }

    async fn write_image(&self, image: &Image) -> Result<()> {
        self.put_json(self.schema.image_key(&image.name), image).await
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        self.list_json(self.schema.images_prefix()).await
    }

    async fn delete_image(&self, name: &str) -> Result<()> {
        self.delete_key("image", name, self.schema.image_key(name)).await
    }

    async fn read_flavor(&self, name: &str) -> Result<Option<Flavor>> {
        Ok(self.get_json(self.schema.flavor_key(name)).await?.map(|(f, _)| f))
    }

    async fn write_flavor(&self, flavor: &Flavor) -> Result<()> {
        self.put_json(self.schema.flavor_key(&flavor.name), flavor).await
    }

    async fn list_flavors(&self) -> Result<Vec<Flavor>> {
        self.list_json(self.schema.flavors_prefix()).await
    }

    async fn delete_flavor(&self, name: &str) -> Result<()> {
        self.delete_key("flavor", name, self.schema.flavor_key(name)).await
    }
}
