//! Alibaba Cloud ECS/VPC client
//!
//! Implements `EcsClientTrait` over the ECS (2014-05-26) and VPC (2016-04-28)
//! RPC APIs.

use crate::common::{Credentials, ECS_API_VERSION, RpcClient, VPC_API_VERSION};
use crate::ecs_trait::EcsClientTrait;
use crate::error::EcsError;
use crate::models::*;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// ECS/VPC API client
#[derive(Debug, Clone)]
pub struct EcsClient {
    region_id: String,
    ecs: RpcClient,
    vpc: RpcClient,
}

impl EcsClient {
    /// Create a client against the public regional endpoints
    ///
    /// # Arguments
    /// * `region_id` - Default region (e.g., "cn-hangzhou")
    /// * `access_key_id` / `access_key_secret` - API credentials
    pub fn new(region_id: String, access_key_id: String, access_key_secret: String) -> Result<Self, EcsError> {
        let ecs_endpoint = default_endpoint("ecs", &region_id);
        let vpc_endpoint = default_endpoint("vpc", &region_id);
        Self::with_endpoints(
            region_id,
            ecs_endpoint,
            vpc_endpoint,
            Credentials { access_key_id, access_key_secret },
        )
    }

    /// Create a client against explicit endpoints
    pub fn with_endpoints(
        region_id: String,
        ecs_endpoint: String,
        vpc_endpoint: String,
        credentials: Credentials,
    ) -> Result<Self, EcsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(EcsError::Http)?;

        Ok(Self {
            region_id,
            ecs: RpcClient::new(client.clone(), ecs_endpoint, ECS_API_VERSION, credentials.clone()),
            vpc: RpcClient::new(client, vpc_endpoint, VPC_API_VERSION, credentials),
        })
    }

    async fn describe_instances(&self, params: BTreeMap<String, String>) -> Result<Vec<Instance>, EcsError> {
        let response: DescribeInstancesResponse = self.ecs.call("DescribeInstances", params).await?;
        Ok(response.instances.instance.into_iter().map(Instance::from).collect())
    }
}

/// Public regional endpoint of a product, e.g. `https://ecs.cn-hangzhou.aliyuncs.com`
pub fn default_endpoint(product: &str, region_id: &str) -> String {
    format!("https://{}.{}.aliyuncs.com", product, region_id)
}

fn region_or<'a>(requested: &'a str, fallback: &'a str) -> &'a str {
    if requested.is_empty() { fallback } else { requested }
}

/// DescribeInstances filter for a lookup
pub fn describe_params(lookup: &InstanceLookup, default_region: &str) -> Result<BTreeMap<String, String>, EcsError> {
    let mut params = BTreeMap::new();
    params.insert("RegionId".to_string(), region_or(&lookup.region_id, default_region).to_string());
    if let Some(id) = &lookup.instance_id {
        params.insert("InstanceIds".to_string(), serde_json::to_string(&[id])?);
    } else if let Some((key, value)) = &lookup.tag {
        params.insert("Tag.1.Key".to_string(), key.clone());
        params.insert("Tag.1.Value".to_string(), value.clone());
    } else {
        return Err(EcsError::InvalidRequest(
            "instance lookup needs an instance id or a tag".to_string(),
        ));
    }
    Ok(params)
}

/// RunInstances parameters for one instance
pub fn run_instances_params(request: &RunInstanceRequest, default_region: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let mut put = |key: String, value: Option<String>| {
        if let Some(value) = value {
            params.insert(key, value);
        }
    };

    put("RegionId".into(), Some(region_or(&request.region_id, default_region).to_string()));
    put("Amount".into(), Some("1".to_string()));
    put("InstanceType".into(), Some(request.instance_type.clone()));
    put("ImageId".into(), Some(request.image_id.clone()));
    put("ZoneId".into(), request.zone_id.clone());
    put("InstanceName".into(), request.instance_name.clone());
    put("Description".into(), request.description.clone());
    put("IoOptimized".into(), request.io_optimized.clone());
    put("SecurityGroupId".into(), request.security_group_id.clone());
    put("VSwitchId".into(), request.vswitch_id.clone());
    put("PrivateIpAddress".into(), request.private_ip_address.clone());
    put("InternetMaxBandwidthIn".into(), request.internet_max_bandwidth_in.map(|v| v.to_string()));
    put("InternetMaxBandwidthOut".into(), request.internet_max_bandwidth_out.map(|v| v.to_string()));
    put("InternetChargeType".into(), request.internet_charge_type.clone());
    put("InstanceChargeType".into(), request.instance_charge_type.clone());
    put("ClientToken".into(), request.client_token.clone());
    put("UserData".into(), request.user_data.as_ref().map(|data| STANDARD.encode(data)));

    if request.auto_renew {
        put("AutoRenew".into(), Some("true".to_string()));
        put("AutoRenewPeriod".into(), request.auto_renew_period.map(|v| v.to_string()));
    }

    let disk = &request.system_disk;
    put("SystemDisk.Size".into(), disk.size.map(|v| v.to_string()));
    put("SystemDisk.Category".into(), disk.category.clone());
    put("SystemDisk.DiskName".into(), disk.disk_name.clone());
    put("SystemDisk.Description".into(), disk.description.clone());
    put("SystemDisk.PerformanceLevel".into(), disk.performance_level.clone());
    put("SystemDisk.AutoSnapshotPolicyId".into(), disk.auto_snapshot_policy_id.clone());

    for (i, disk) in request.data_disks.iter().enumerate() {
        let n = i + 1;
        put(format!("DataDisk.{}.Size", n), Some(disk.size.to_string()));
        put(format!("DataDisk.{}.SnapshotId", n), disk.snapshot_id.clone());
        put(format!("DataDisk.{}.Category", n), disk.category.clone());
        put(format!("DataDisk.{}.Encrypted", n), disk.encrypted.map(|v| v.to_string()));
        put(format!("DataDisk.{}.KMSKeyId", n), disk.kms_key_id.clone());
        put(format!("DataDisk.{}.DiskName", n), disk.disk_name.clone());
        put(format!("DataDisk.{}.Description", n), disk.description.clone());
        put(format!("DataDisk.{}.DeleteWithInstance", n), disk.delete_with_instance.map(|v| v.to_string()));
        put(format!("DataDisk.{}.PerformanceLevel", n), disk.performance_level.clone());
        put(format!("DataDisk.{}.AutoSnapshotPolicyId", n), disk.auto_snapshot_policy_id.clone());
    }

    for (i, (key, value)) in request.tags.iter().enumerate() {
        put(format!("Tag.{}.Key", i + 1), Some(key.clone()));
        put(format!("Tag.{}.Value", i + 1), Some(value.clone()));
    }

    params
}

#[async_trait::async_trait]
impl EcsClientTrait for EcsClient {
    fn region_id(&self) -> &str {
        &self.region_id
    }

    async fn validate_credentials(&self) -> Result<(), EcsError> {
        debug!("Validating ECS credentials against {}", self.ecs.endpoint());
        let _: serde_json::Value = self.ecs.call("DescribeRegions", BTreeMap::new()).await?;
        Ok(())
    }

    async fn run_instance(&self, request: &RunInstanceRequest) -> Result<Option<Instance>, EcsError> {
        let params = run_instances_params(request, &self.region_id);
        let response: RunInstancesResponse = self.ecs.call("RunInstances", params).await?;

        let Some(instance_id) = response.instance_id_sets.instance_id_set.into_iter().next() else {
            warn!("RunInstances accepted the request but returned no instance id");
            return Ok(None);
        };
        info!("RunInstances created instance {}", instance_id);

        let lookup = InstanceLookup {
            region_id: request.region_id.clone(),
            instance_id: Some(instance_id.clone()),
            tag: None,
        };
        match self.find_instance(&lookup).await? {
            Some(instance) => Ok(Some(instance)),
            None => {
                debug!("Instance {} is not describable yet, reporting it as Pending", instance_id);
                Ok(Some(Instance::accepted(instance_id, request, &self.region_id)))
            }
        }
    }

    async fn find_instance(&self, lookup: &InstanceLookup) -> Result<Option<Instance>, EcsError> {
        let params = describe_params(lookup, &self.region_id)?;
        let mut instances = self.describe_instances(params).await?;
        if instances.len() > 1 {
            warn!(
                "Lookup {:?} matched {} instances, using {}",
                lookup,
                instances.len(),
                instances[0].id
            );
        }
        Ok(if instances.is_empty() { None } else { Some(instances.swap_remove(0)) })
    }

    async fn terminate_instance(&self, region_id: &str, instance_id: &str) -> Result<(), EcsError> {
        let params = BTreeMap::from([
            ("InstanceId".to_string(), instance_id.to_string()),
            ("Force".to_string(), "true".to_string()),
        ]);
        match self.ecs.call::<serde_json::Value>("DeleteInstance", params).await {
            Ok(_) => {
                info!("Released instance {} in {}", instance_id, region_or(region_id, &self.region_id));
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("Instance {} already released", instance_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn reconcile_network(&self, request: &NetworkRequest) -> Result<NetworkStatus, EcsError> {
        let Some(vpc_id) = &request.vpc_id else {
            return Err(EcsError::InvalidRequest(
                "automatic VPC creation is not supported, set networkSpec.vpcId".to_string(),
            ));
        };

        let params = BTreeMap::from([
            ("RegionId".to_string(), region_or(&request.region_id, &self.region_id).to_string()),
            ("VpcId".to_string(), vpc_id.clone()),
        ]);
        let response: DescribeVpcsResponse = self.vpc.call("DescribeVpcs", params).await?;
        let vpc = response
            .vpcs
            .vpc
            .into_iter()
            .find(|v| &v.vpc_id == vpc_id)
            .ok_or_else(|| EcsError::NotFound(format!("VPC {} not found", vpc_id)))?;

        let known = vpc.vswitch_ids.vswitch_id;
        if let Some(missing) = request.vswitch_ids.iter().find(|id| !known.contains(id)) {
            return Err(EcsError::InvalidRequest(format!(
                "vswitch {} does not belong to VPC {}",
                missing, vpc_id
            )));
        }

        let vswitch_ids = if request.vswitch_ids.is_empty() { known } else { request.vswitch_ids.clone() };
        Ok(NetworkStatus { vpc_id: vpc_id.clone(), vswitch_ids })
    }

    async fn delete_network(&self, request: &NetworkRequest) -> Result<(), EcsError> {
        // Only user-supplied VPCs are ever used, and those are left in place.
        debug!("Leaving network {:?} in place", request.vpc_id);
        Ok(())
    }

    async fn reconcile_load_balancer(&self, request: &LoadBalancerRequest) -> Result<Option<String>, EcsError> {
        Ok(request.load_balancer_id.clone())
    }

    async fn delete_load_balancer(&self, request: &LoadBalancerRequest) -> Result<(), EcsError> {
        debug!("Leaving load balancer {:?} in place", request.load_balancer_id);
        Ok(())
    }
}
