use crate::coordinator::Coordinator;
use nimbus_core::{Flavor, Image, NimbusError, Project};
use serde::Deserialize;
use tracing::info;

/// Changes to a project. Ids and names are fixed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectPatch {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub default_image: Option<String>,
    pub default_master_flavor: Option<String>,
    pub default_slaves_flavor: Option<String>,
    pub default_storage_flavor: Option<String>,
    pub default_monitoring_flavor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImagePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub ansible_user: Option<String>,
    pub cloud_image_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlavorPatch {
    pub name: Option<String>,
    pub vcpus: Option<u32>,
    pub ram: Option<u64>,
    pub disk: Option<u64>,
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

fn check_image(image: &Image) -> Result<(), NimbusError> {
    if image.name.is_empty() || image.ansible_user.is_empty() || image.cloud_image_id.is_empty() {
        return Err(NimbusError::InvalidRequest(
            "image needs a name, an ansible user and a cloud image id".into(),
        ));
    }
    Ok(())
}

fn check_flavor(flavor: &Flavor) -> Result<(), NimbusError> {
    if flavor.name.is_empty() {
        return Err(NimbusError::InvalidRequest("flavor name must not be empty".into()));
    }
    if flavor.vcpus == 0 || flavor.ram == 0 || flavor.disk == 0 {
        return Err(NimbusError::InvalidRequest(format!(
            "flavor {} needs non-zero vcpus, ram and disk",
            flavor.name
        )));
    }
    Ok(())
}

impl Coordinator {
    // ── Projects ──

    /// Register a project. Names are unique; a missing id is generated.
    pub async fn add_project(&self, mut project: Project) -> Result<Project, NimbusError> {
        if project.name.is_empty() {
            return Err(NimbusError::InvalidRequest("project name must not be empty".into()));
        }
        if self.db().read_project(&project.name).await?.is_some() {
            return Err(NimbusError::InvalidRequest(format!("project {} already exists", project.name)));
        }
        self.check_project_defaults(&project).await?;
        if project.id.is_empty() {
            project.id = uuid::Uuid::new_v4().to_string();
        }
        if project.display_name.is_empty() {
            project.display_name = project.name.clone();
        }
        self.db().write_project(&project).await?;
        info!(project_id = %project.id, project = %project.name, "Project added");
        Ok(project)
    }

    pub async fn get_project(&self, id_or_name: &str) -> Result<Project, NimbusError> {
        self.db()
            .read_project(id_or_name)
            .await?
            .ok_or_else(|| NimbusError::not_found("project", id_or_name))
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, NimbusError> {
        let mut projects = self.db().list_projects().await?;
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    pub async fn update_project(&self, id_or_name: &str, patch: ProjectPatch) -> Result<Project, NimbusError> {
        let mut project = self.get_project(id_or_name).await?;
        set(&mut project.display_name, patch.display_name);
        set(&mut project.description, patch.description);
        set(&mut project.default_image, patch.default_image);
        set(&mut project.default_master_flavor, patch.default_master_flavor);
        set(&mut project.default_slaves_flavor, patch.default_slaves_flavor);
        set(&mut project.default_storage_flavor, patch.default_storage_flavor);
        set(&mut project.default_monitoring_flavor, patch.default_monitoring_flavor);
        self.check_project_defaults(&project).await?;

        self.db().write_project(&project).await?;
        info!(project_id = %project.id, project = %project.name, "Project updated");
        Ok(project)
    }

    /// Remove a project that owns no clusters.
    pub async fn delete_project(&self, id_or_name: &str) -> Result<(), NimbusError> {
        let project = self.get_project(id_or_name).await?;
        if let Some(cluster) = self.db().list_project_clusters(&project.id).await?.first() {
            return Err(NimbusError::InUse {
                kind: "project",
                id: project.name,
                used_by: format!("cluster {}", cluster.name),
            });
        }
        self.db().delete_project(&project.id).await?;
        info!(project_id = %project.id, project = %project.name, "Project deleted");
        Ok(())
    }

    /// Project defaults, when set, must name registered resources.
    async fn check_project_defaults(&self, project: &Project) -> Result<(), NimbusError> {
        if !project.default_image.is_empty() && self.db().read_image(&project.default_image).await?.is_none() {
            return Err(NimbusError::not_found("image", &project.default_image));
        }
        for flavor in [
            &project.default_master_flavor,
            &project.default_slaves_flavor,
            &project.default_storage_flavor,
            &project.default_monitoring_flavor,
        ] {
            if !flavor.is_empty() && self.db().read_flavor(flavor).await?.is_none() {
                return Err(NimbusError::not_found("flavor", flavor));
            }
        }
        Ok(())
    }

    // ── Images ──

    /// Register an image under a new name.
    pub async fn add_image(&self, mut image: Image) -> Result<Image, NimbusError> {
        check_image(&image)?;
        if self.db().read_image(&image.name).await?.is_some() {
            return Err(NimbusError::InvalidRequest(format!("image {} already exists", image.name)));
        }
        if image.id.is_empty() {
            image.id = uuid::Uuid::new_v4().to_string();
        }
        self.db().write_image(&image).await?;
        info!(image = %image.name, cloud_image_id = %image.cloud_image_id, "Image added");
        Ok(image)
    }

    pub async fn get_image(&self, name: &str) -> Result<Image, NimbusError> {
        self.db()
            .read_image(name)
            .await?
            .ok_or_else(|| NimbusError::not_found("image", name))
    }

    pub async fn list_images(&self) -> Result<Vec<Image>, NimbusError> {
        let mut images = self.db().list_images().await?;
        images.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(images)
    }

    /// Change an image no cluster or project refers to.
    pub async fn update_image(&self, name: &str, patch: ImagePatch) -> Result<Image, NimbusError> {
        let mut image = self.get_image(name).await?;
        self.ensure_image_unused(name).await?;
        set(&mut image.name, patch.name);
        set(&mut image.description, patch.description);
        set(&mut image.ansible_user, patch.ansible_user);
        set(&mut image.cloud_image_id, patch.cloud_image_id);
        check_image(&image)?;

        let renamed = image.name != name;
        if renamed && self.db().read_image(&image.name).await?.is_some() {
            return Err(NimbusError::InvalidRequest(format!("image {} already exists", image.name)));
        }
        self.db().write_image(&image).await?;
        if renamed {
            self.db().delete_image(name).await?;
        }
        info!(image = %image.name, cloud_image_id = %image.cloud_image_id, "Image updated");
        Ok(image)
    }

    pub async fn delete_image(&self, name: &str) -> Result<(), NimbusError> {
        self.get_image(name).await?;
        self.ensure_image_unused(name).await?;
        self.db().delete_image(name).await?;
        info!(image = %name, "Image deleted");
        Ok(())
    }

    async fn ensure_image_unused(&self, name: &str) -> Result<(), NimbusError> {
        let in_use = |used_by: String| NimbusError::InUse {
            kind: "image",
            id: name.to_string(),
            used_by,
        };
        if let Some(cluster) = self.db().list_clusters().await?.into_iter().find(|c| c.image == name) {
            return Err(in_use(format!("cluster {}", cluster.name)));
        }
        if let Some(project) = self
            .db()
            .list_projects()
            .await?
            .into_iter()
            .find(|p| p.default_image == name)
        {
            return Err(in_use(format!("project {}", project.name)));
        }
        Ok(())
    }

    // ── Flavors ──

    /// Register a flavor under a new name.
    pub async fn add_flavor(&self, mut flavor: Flavor) -> Result<Flavor, NimbusError> {
        check_flavor(&flavor)?;
        if self.db().read_flavor(&flavor.name).await?.is_some() {
            return Err(NimbusError::InvalidRequest(format!("flavor {} already exists", flavor.name)));
        }
        if flavor.id.is_empty() {
            flavor.id = uuid::Uuid::new_v4().to_string();
        }
        self.db().write_flavor(&flavor).await?;
        info!(flavor = %flavor.name, vcpus = flavor.vcpus, ram = flavor.ram, "Flavor added");
        Ok(flavor)
    }

    pub async fn get_flavor(&self, name: &str) -> Result<Flavor, NimbusError> {
        self.db()
            .read_flavor(name)
            .await?
            .ok_or_else(|| NimbusError::not_found("flavor", name))
    }

    pub async fn list_flavors(&self) -> Result<Vec<Flavor>, NimbusError> {
        let mut flavors = self.db().list_flavors().await?;
        flavors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(flavors)
    }

    /// Change a flavor no cluster or project refers to.
    pub async fn update_flavor(&self, name: &str, patch: FlavorPatch) -> Result<Flavor, NimbusError> {
        let mut flavor = self.get_flavor(name).await?;
        self.ensure_flavor_unused(name).await?;
        set(&mut flavor.name, patch.name);
        set(&mut flavor.vcpus, patch.vcpus);
        set(&mut flavor.ram, patch.ram);
        set(&mut flavor.disk, patch.disk);
        check_flavor(&flavor)?;

        let renamed = flavor.name != name;
        if renamed && self.db().read_flavor(&flavor.name).await?.is_some() {
            return Err(NimbusError::InvalidRequest(format!("flavor {} already exists", flavor.name)));
        }
        self.db().write_flavor(&flavor).await?;
        if renamed {
            self.db().delete_flavor(name).await?;
        }
        info!(flavor = %flavor.name, vcpus = flavor.vcpus, ram = flavor.ram, "Flavor updated");
        Ok(flavor)
    }

    pub async fn delete_flavor(&self, name: &str) -> Result<(), NimbusError> {
        self.get_flavor(name).await?;
        self.ensure_flavor_unused(name).await?;
        self.db().delete_flavor(name).await?;
        info!(flavor = %name, "Flavor deleted");
        Ok(())
    }

    async fn ensure_flavor_unused(&self, name: &str) -> Result<(), NimbusError> {
        let in_use = |used_by: String| NimbusError::InUse {
            kind: "flavor",
            id: name.to_string(),
            used_by,
        };
        if let Some(cluster) = self.db().list_clusters().await?.into_iter().find(|c| {
            [&c.master_flavor, &c.slaves_flavor, &c.storage_flavor, &c.monitoring_flavor]
                .iter()
                .any(|f| f.as_str() == name)
        }) {
            return Err(in_use(format!("cluster {}", cluster.name)));
        }
        if let Some(project) = self.db().list_projects().await?.into_iter().find(|p| {
            [
                &p.default_master_flavor,
                &p.default_slaves_flavor,
                &p.default_storage_flavor,
                &p.default_monitoring_flavor,
            ]
            .iter()
            .any(|f| f.as_str() == name)
        }) {
            return Err(in_use(format!("project {}", project.name)));
        }
        Ok(())
    }
}
