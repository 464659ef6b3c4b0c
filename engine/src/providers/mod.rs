pub mod bus_api;
pub mod http;

pub use bus_api::BusApi;
pub use http::{HttpFetcher, RequestQuota};

use crate::error::NetworkError;
use futures::future::BoxFuture;

/// Bus information API operations used by the alarm engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    StationsByRoute,
    BusPositionsByRoute,
    BusPositionByVehicle,
    ArrivalByRoute,
}

impl Endpoint {
    /// Path below the API base URL
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::StationsByRoute => "busRouteInfo/getStaionByRoute",
            Endpoint::BusPositionsByRoute => "buspos/getBusPosByRtid",
            Endpoint::BusPositionByVehicle => "buspos/getBusPosByVehId",
            Endpoint::ArrivalByRoute => "arrive/getArrInfoByRoute",
        }
    }
}

/// Query parameters, in the order they are sent
pub type Params = Vec<(&'static str, String)>;

/// Raw transport: fetches one endpoint and returns the response body
pub trait Fetch: Send + Sync {
    fn fetch(&self, endpoint: Endpoint, params: Params) -> BoxFuture<'_, Result<String, NetworkError>>;
}
