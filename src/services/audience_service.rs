use crate::entities::{student_entity as student, teacher_entity as teacher};
use crate::error::AppResult;
use crate::models::{AudienceRole, AudienceTarget, Recipient};
use crate::store::DirectoryStore;
use crate::utils::normalize_phone;
use std::collections::HashSet;
use std::sync::Arc;

/// 受众展开：把逻辑目标（角色或用户列表）展开为具体接收人集合。
/// 接收人是临时合成的，从不落库。
#[derive(Clone)]
pub struct AudienceExpander {
    directory: Arc<dyn DirectoryStore>,
}

impl AudienceExpander {
    pub fn new(directory: Arc<dyn DirectoryStore>) -> Self {
        Self { directory }
    }

    pub async fn expand(
        &self,
        school_id: i64,
        targets: &[AudienceTarget],
    ) -> AppResult<Vec<Recipient>> {
        let mut recipients: Vec<Recipient> = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();
        // 家长伪接收人跨整批按手机号去重（父母共用一部手机很常见）
        let mut seen_parent_phones: HashSet<String> = HashSet::new();

        for target in targets {
            let batch = match target {
                AudienceTarget::Users(ids) => self.expand_users(school_id, ids).await?,
                AudienceTarget::Role(AudienceRole::Student) => {
                    let students = self.directory.active_students(school_id).await?;
                    students.into_iter().map(student_recipient).collect()
                }
                AudienceTarget::Role(AudienceRole::Teacher) => {
                    let teachers = self.directory.active_teachers(school_id).await?;
                    teachers.into_iter().map(teacher_recipient).collect()
                }
                AudienceTarget::Role(AudienceRole::Parent) => {
                    let students = self.directory.active_students(school_id).await?;
                    students
                        .iter()
                        .flat_map(|s| parent_recipients(s, &mut seen_parent_phones))
                        .collect()
                }
            };
            for r in batch {
                if seen_ids.insert(r.id.clone()) {
                    recipients.push(r);
                }
            }
        }

        Ok(recipients)
    }

    async fn expand_users(&self, school_id: i64, ids: &[i64]) -> AppResult<Vec<Recipient>> {
        let mut out = Vec::new();
        for s in self.directory.students_by_ids(school_id, ids).await? {
            out.push(student_recipient(s));
        }
        for t in self.directory.teachers_by_ids(school_id, ids).await? {
            out.push(teacher_recipient(t));
        }
        Ok(out)
    }
}

fn student_recipient(s: student::Model) -> Recipient {
    Recipient {
        id: format!("student-{}", s.id),
        phone: s.phone.as_deref().and_then(normalize_phone),
        email: s.email,
        name: s.name,
        role: AudienceRole::Student,
    }
}

fn teacher_recipient(t: teacher::Model) -> Recipient {
    Recipient {
        id: format!("teacher-{}", t.id),
        phone: t.phone.as_deref().and_then(normalize_phone),
        email: t.email,
        name: t.name,
        role: AudienceRole::Teacher,
    }
}

/// 每个在读学生最多合成两个家长接收人（父/母各一），没有留任何
/// 家长手机号的学生产出零个
fn parent_recipients(s: &student::Model, seen_phones: &mut HashSet<String>) -> Vec<Recipient> {
    let mut out = Vec::new();
    let contacts = [
        ("father", s.father_phone.as_deref()),
        ("mother", s.mother_phone.as_deref()),
    ];
    for (kind, raw) in contacts {
        let Some(phone) = raw.and_then(normalize_phone) else {
            continue;
        };
        if !seen_phones.insert(phone.clone()) {
            continue;
        }
        // 监护人邮箱只挂在该学生的第一个家长接收人上，避免重复投递
        let email = if out.is_empty() {
            s.guardian_email.clone()
        } else {
            None
        };
        out.push(Recipient {
            id: format!("parent-{}-{}", s.id, kind),
            name: format!("Parent of {}", s.name),
            email,
            phone: Some(phone),
            role: AudienceRole::Parent,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDirectoryStore;
    use chrono::Utc;

    fn student_model(
        id: i64,
        father: Option<&str>,
        mother: Option<&str>,
        guardian_email: Option<&str>,
    ) -> student::Model {
        student::Model {
            id,
            school_id: 1,
            name: format!("Student {id}"),
            phone: None,
            email: None,
            father_phone: father.map(str::to_string),
            mother_phone: mother.map(str::to_string),
            guardian_email: guardian_email.map(str::to_string),
            is_active: true,
            created_at: Some(Utc::now()),
        }
    }

    fn teacher_model(id: i64, phone: Option<&str>) -> teacher::Model {
        teacher::Model {
            id,
            school_id: 1,
            name: format!("Teacher {id}"),
            phone: phone.map(str::to_string),
            email: Some(format!("t{id}@school.example")),
            is_active: true,
            created_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn test_parent_expansion_yields_up_to_two_per_student() {
        let dir = MemoryDirectoryStore::new();
        dir.add_student(student_model(
            1,
            Some("9000000001"),
            Some("9000000002"),
            Some("guardian1@example.com"),
        ))
        .await;
        dir.add_student(student_model(2, None, None, Some("guardian2@example.com")))
            .await;

        let expander = AudienceExpander::new(Arc::new(dir));
        let recipients = expander
            .expand(1, &[AudienceTarget::Role(AudienceRole::Parent)])
            .await
            .unwrap();

        // 学生 1 出两个家长，学生 2 没有任何家长手机号出零个
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[0].id, "parent-1-father");
        assert_eq!(recipients[1].id, "parent-1-mother");
        // 监护人邮箱只挂第一个，避免同一封邮件进两次
        assert_eq!(
            recipients[0].email.as_deref(),
            Some("guardian1@example.com")
        );
        assert!(recipients[1].email.is_none());
        // 裸 10 位号码补上默认国家码
        assert_eq!(recipients[0].phone.as_deref(), Some("+919000000001"));
    }

    #[tokio::test]
    async fn test_shared_parent_phone_deduped_across_students() {
        let dir = MemoryDirectoryStore::new();
        // 兄弟俩登记了同一个父亲手机号
        dir.add_student(student_model(1, Some("9000000001"), None, None))
            .await;
        dir.add_student(student_model(2, Some("9000000001"), None, None))
            .await;

        let expander = AudienceExpander::new(Arc::new(dir));
        let recipients = expander
            .expand(1, &[AudienceTarget::Role(AudienceRole::Parent)])
            .await
            .unwrap();
        assert_eq!(recipients.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_across_targets_deduped_by_id() {
        let dir = MemoryDirectoryStore::new();
        dir.add_teacher(teacher_model(5, Some("9000000005"))).await;

        let expander = AudienceExpander::new(Arc::new(dir));
        let recipients = expander
            .expand(
                1,
                &[
                    AudienceTarget::Role(AudienceRole::Teacher),
                    AudienceTarget::Users(vec![5]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].id, "teacher-5");
    }

    #[tokio::test]
    async fn test_user_targets_resolve_students_and_teachers() {
        let dir = MemoryDirectoryStore::new();
        let mut s = student_model(3, None, None, None);
        s.phone = Some("9000000003".to_string());
        dir.add_student(s).await;
        dir.add_teacher(teacher_model(4, None)).await;
        // 不存在的 id 静默跳过
        let expander = AudienceExpander::new(Arc::new(dir));
        let recipients = expander
            .expand(1, &[AudienceTarget::Users(vec![3, 4, 999])])
            .await
            .unwrap();
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[0].role, AudienceRole::Student);
        assert_eq!(recipients[1].role, AudienceRole::Teacher);
    }

    #[tokio::test]
    async fn test_inactive_members_excluded_from_role_broadcast() {
        let dir = MemoryDirectoryStore::new();
        let mut t = teacher_model(7, Some("9000000007"));
        t.is_active = false;
        dir.add_teacher(t).await;

        let expander = AudienceExpander::new(Arc::new(dir));
        let recipients = expander
            .expand(1, &[AudienceTarget::Role(AudienceRole::Teacher)])
            .await
            .unwrap();
        assert!(recipients.is_empty());
    }
}
