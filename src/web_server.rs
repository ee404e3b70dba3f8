use std::sync::Arc;

use actix_web::{dev::Server, middleware, web, App, HttpServer};

use crate::config::Config;
use crate::routes::{
    check_handler, create_job_handler, get_batch_handler, health_handler, json_error_handler,
    query_error_handler, submit_batch_handler,
};
use crate::store::JobStore;

pub fn build_server(config: Config, store: Arc<dyn JobStore>) -> std::io::Result<Server> {
    let port = config.port;
    let store = web::Data::from(store); // Construct directly from Arc
    let config = web::Data::new(config);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(store.clone())
            .app_data(config.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .wrap(middleware::Logger::default())
            .service(create_job_handler)
            .service(check_handler)
            .service(health_handler)
            .service(submit_batch_handler)
            .service(get_batch_handler)
    })
    .bind(("0.0.0.0", port))?
    .run();

    Ok(server)
}
