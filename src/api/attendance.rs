use crate::{
    auth::auth::AuthUser,
    error::AppError,
    model::attendance::{DtrEntry, DtrFilter, DtrRecord, PunchKind},
    store::Store,
    utils::dtr_report::{render_csv, report_filename},
};
use actix_web::{
    HttpResponse, web,
    http::header::{ContentDisposition, DispositionParam, DispositionType},
};
use chrono::{Local, NaiveDate, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

/// Browser clients keep the id from the login response as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Num(u64),
    Str(String),
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<IdRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IdRepr::Num(id)) => Ok(Some(id)),
        Some(IdRepr::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(IdRepr::Str(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid user id {s:?}"))),
    }
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PunchReq {
    /// Defaults to the caller. Only admins may punch for someone else.
    /// Accepts a number or a numeric string.
    #[serde(default, deserialize_with = "number_or_numeric_string")]
    #[schema(example = 2, value_type = Option<u64>)]
    pub user_id: Option<u64>,
    #[serde(rename = "type")]
    pub kind: PunchKind,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DtrResponse {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 2)]
    pub user_id: u64,
    #[schema(example = "2025-01-06", format = "date", value_type = String)]
    pub date: NaiveDate,
    #[schema(example = "08:01:12", value_type = Option<String>)]
    pub morning_in: Option<NaiveTime>,
    #[schema(example = "12:00:40", value_type = Option<String>)]
    pub morning_out: Option<NaiveTime>,
    #[schema(value_type = Option<String>)]
    pub afternoon_in: Option<NaiveTime>,
    #[schema(value_type = Option<String>)]
    pub afternoon_out: Option<NaiveTime>,
    #[serde(rename = "type")]
    pub kind: PunchKind,
    /// Hours covered by completed shifts
    #[schema(example = 3.99)]
    pub total_hours: Option<f64>,
}

impl From<&DtrRecord> for DtrResponse {
    fn from(r: &DtrRecord) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            date: r.date,
            morning_in: r.morning_in,
            morning_out: r.morning_out,
            afternoon_in: r.afternoon_in,
            afternoon_out: r.afternoon_out,
            kind: r.kind,
            total_hours: r.total_hours(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct DtrEntryResponse {
    #[serde(flatten)]
    pub dtr: DtrResponse,
    /// `null` once the owning account has been deleted
    #[schema(example = "juan")]
    pub username: Option<String>,
}

impl From<&DtrEntry> for DtrEntryResponse {
    fn from(entry: &DtrEntry) -> Self {
        Self {
            dtr: DtrResponse::from(&entry.record),
            username: entry.username.clone(),
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct DtrQuery {
    /// Only this user's records
    pub user_id: Option<u64>,
    /// Exact day, `YYYY-MM-DD`
    #[param(value_type = Option<String>)]
    pub date: Option<NaiveDate>,
    /// First day, inclusive
    #[param(value_type = Option<String>)]
    pub from: Option<NaiveDate>,
    /// Last day, inclusive
    #[param(value_type = Option<String>)]
    pub to: Option<NaiveDate>,
}

impl From<DtrQuery> for DtrFilter {
    fn from(q: DtrQuery) -> Self {
        DtrFilter {
            user_id: q.user_id,
            date: q.date,
            from: q.from,
            to: q.to,
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DayQuery {
    /// `YYYY-MM-DD`, defaults to today
    #[param(value_type = Option<String>)]
    pub date: Option<NaiveDate>,
}

/// Record a punch for today
#[utoipa::path(
    post,
    path = "/api/dtr/time",
    request_body = PunchReq,
    responses(
        (status = 200, description = "Punch recorded", body = Object, example = json!({
            "message": "Time recorded successfully!",
            "dtr": {
                "id": 1, "userId": 2, "date": "2025-01-06",
                "morningIn": "08:01:12", "morningOut": null,
                "afternoonIn": null, "afternoonOut": null,
                "type": "morningIn", "totalHours": null
            }
        })),
        (status = 400, description = "Already recorded or out of order", body = Object, example = json!({
            "message": "morningIn already recorded for today"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Punching for another user"),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn record_time(
    auth: AuthUser,
    store: web::Data<dyn Store>,
    body: web::Json<PunchReq>,
) -> Result<HttpResponse, AppError> {
    let user_id = body.user_id.unwrap_or(auth.user_id);

    if user_id != auth.user_id {
        auth.require_admin()
            .map_err(|_| AppError::Forbidden("You can only record your own time".into()))?;
    }

    if store.find_account(user_id).await?.is_none() {
        return Err(AppError::NotFound("User not found".into()));
    }

    let now = Local::now().naive_local();
    let record = store.record_punch(user_id, body.kind, now).await?;

    info!(user_id, dtr_id = record.id, kind = %body.kind, "Time recorded");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Time recorded successfully!",
        "dtr": DtrResponse::from(&record),
    })))
}

/// All records with owner usernames
#[utoipa::path(
    get,
    path = "/api/dtr/all",
    params(DtrQuery),
    responses(
        (status = 200, description = "Records, newest day first", body = [DtrEntryResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin only"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn list_all(
    auth: AuthUser,
    store: web::Data<dyn Store>,
    query: web::Query<DtrQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;

    let entries = store.list_dtrs(&query.into_inner().into()).await?;
    let body: Vec<DtrEntryResponse> = entries.iter().map(DtrEntryResponse::from).collect();

    Ok(HttpResponse::Ok().json(body))
}

/// Download records as CSV
#[utoipa::path(
    get,
    path = "/api/dtr/export",
    params(DtrQuery),
    responses(
        (status = 200, description = "CSV report", content_type = "text/csv", body = String),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin only"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn export(
    auth: AuthUser,
    store: web::Data<dyn Store>,
    query: web::Query<DtrQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;

    let entries = store.list_dtrs(&query.into_inner().into()).await?;
    let csv = render_csv(&entries).map_err(|e| AppError::Internal(format!("csv export: {e}")))?;

    let filename = report_filename(Local::now().date_naive());
    info!(rows = entries.len(), %filename, "Exported time records");

    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(filename)],
        })
        .body(csv))
}

/// One user's record for a day
#[utoipa::path(
    get,
    path = "/api/dtr/{user_id}",
    params(
        ("user_id" = u64, Path, description = "Account id"),
        DayQuery
    ),
    responses(
        (status = 200, description = "The day's record", body = DtrResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Another user's record"),
        (status = 404, description = "No record for that day"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn get_for_user(
    auth: AuthUser,
    store: web::Data<dyn Store>,
    path: web::Path<u64>,
    query: web::Query<DayQuery>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();

    if !auth.can_access(user_id) {
        return Err(AppError::Forbidden(
            "You can only view your own records".into(),
        ));
    }

    let date = query.date.unwrap_or_else(|| Local::now().date_naive());
    let record = store
        .find_dtr(user_id, date)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No time record for {date}")))?;

    Ok(HttpResponse::Ok().json(DtrResponse::from(&record)))
}
